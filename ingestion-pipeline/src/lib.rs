pub mod chunker;
pub mod enricher;
pub mod llm_instructions;
pub mod metadata;
pub mod notion;
pub mod pipeline;
