//! 查询流水线：判定 → 生成 → 执行 → 回答，以及检索路径

pub mod composer;
pub mod oracle;
pub mod orchestrator;
pub mod synthesizer;

pub use composer::AnswerComposer;
pub use oracle::DecisionOracle;
pub use orchestrator::Orchestrator;
pub use synthesizer::{parse_routine, RoutineSynthesizer, SynthesisError};
