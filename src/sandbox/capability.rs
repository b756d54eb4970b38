//! 能力白名单
//!
//! 隔离上下文中只存在这里显式列出的全局对象；宿主进程的其它状态（process、环境变量、文件句柄）
//! 不会被放进上下文。注意这只是故障与资源隔离：Require 放行的内置模块本身仍具备真实的网络与文件 I/O。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 可授予生成代码的单项能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// console.log / info / warn / error / debug；输出转发到宿主 stderr，并以 debug 级别写入 tracing
    Console,
    /// require()，只允许 Node 内置模块（https、url、crypto、fs…），第三方包一律拒绝；
    /// 同时提供 CommonJS 形态的 module / exports
    Require,
    /// URL 与 URLSearchParams
    Url,
    /// TextEncoder 与 TextDecoder
    TextCodec,
    /// Buffer
    Buffer,
    /// setTimeout / clearTimeout / setInterval / clearInterval
    Timers,
    /// 全局 fetch（Node 18+ 才存在）
    Fetch,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Console,
        Capability::Require,
        Capability::Url,
        Capability::TextCodec,
        Capability::Buffer,
        Capability::Timers,
        Capability::Fetch,
    ];

    /// 传给求值运行时的名字（与 serde 名一致）
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Console => "console",
            Capability::Require => "require",
            Capability::Url => "url",
            Capability::TextCodec => "text_codec",
            Capability::Buffer => "buffer",
            Capability::Timers => "timers",
            Capability::Fetch => "fetch",
        }
    }
}

/// 构造隔离上下文时传入的能力集合（有序、去重）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// 空集合：上下文里只有语言内建对象
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(Capability::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_match_serde() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.as_str()));
        }
    }

    #[test]
    fn test_set_dedups_and_orders() {
        let set: CapabilitySet = [Capability::Require, Capability::Console, Capability::Require]
            .into_iter()
            .collect();
        assert_eq!(set.names(), vec!["console", "require"]);
        assert!(set.contains(Capability::Console));
        assert!(!set.contains(Capability::Fetch));
        assert!(CapabilitySet::none().is_empty());
        assert_eq!(CapabilitySet::all().len(), 7);
    }
}
