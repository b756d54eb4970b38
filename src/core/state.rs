//! 查询阶段与单次查询的轨迹
//!
//! Deciding → {Retrieving → Synthesizing → Executing → Composing} | {Retrieving → Composing} → Done / Failed

use serde::Serialize;

use crate::sandbox::{ExecutionReport, FailureKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    Deciding,
    Retrieving,
    Synthesizing,
    Executing,
    Composing,
    Done,
    Failed,
}

impl QueryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryPhase::Deciding => "deciding",
            QueryPhase::Retrieving => "retrieving",
            QueryPhase::Synthesizing => "synthesizing",
            QueryPhase::Executing => "executing",
            QueryPhase::Composing => "composing",
            QueryPhase::Done => "done",
            QueryPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryPhase::Done | QueryPhase::Failed)
    }
}

/// 单次查询经过的阶段、判定结果与执行报告（若有）
#[derive(Debug, Default)]
pub struct QueryTrace {
    pub phases: Vec<QueryPhase>,
    pub generated: Option<bool>,
    pub execution: Option<ExecutionReport>,
    /// 生成路径上的失败类别：没生成出函数为 Synthesis，否则取执行结果的类别
    pub failure: Option<FailureKind>,
    /// 本次查询期间 LLM 客户端累计 token 的增量（并发查询时为近似值）
    pub tokens_used: u64,
}

impl QueryTrace {
    pub fn enter(&mut self, phase: QueryPhase) {
        tracing::info!(phase = phase.as_str(), "query phase");
        self.phases.push(phase);
    }

    pub fn visited(&self, phase: QueryPhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn last(&self) -> Option<QueryPhase> {
        self.phases.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_records_order() {
        let mut trace = QueryTrace::default();
        trace.enter(QueryPhase::Deciding);
        trace.enter(QueryPhase::Retrieving);
        trace.enter(QueryPhase::Done);
        assert_eq!(
            trace.phases,
            vec![QueryPhase::Deciding, QueryPhase::Retrieving, QueryPhase::Done]
        );
        assert!(trace.visited(QueryPhase::Retrieving));
        assert!(!trace.visited(QueryPhase::Executing));
        assert!(trace.last().unwrap().is_terminal());
    }
}
