//! 外部 I/O 词表 (DB / REST / RPC)
//!
//! 纯子串匹配: 文本先转小写，再与三组模式逐一比较，任意一组命中即为外部 I/O。
//! 词表本身是配置数据，可以通过 `.java-cost.yml` 追加。

use memchr::memmem;
use serde::Serialize;

/// Mongo / repository-style persistence and JDBC / JPA.
pub const STORAGE_PATTERNS: &[&str] = &[
    // Mongo / NoSQL
    "mongotemplate",
    "mongodb",
    "mongoclient",
    "mongorepository",
    "mongooperations",
    "document",
    "collection",
    "cursor",
    "batchsize",
    "findone",
    "findall",
    "findbyid",
    "save",
    "insert",
    "update",
    "delete",
    "aggregate",
    "aggregation",
    "dbobject",
    // JDBC / SQL / JPA
    "datasource",
    "connection",
    "preparedstatement",
    "statement.execute",
    "statement.executequery",
    "resultset.next",
    "jdbc",
    "entitymanager",
    "createnativequery",
    "createquery",
    "transaction.begin",
    "transaction.commit",
    "query.setparameter",
    "rowmapper",
];

/// REST / HTTP clients and request mappings.
pub const REST_PATTERNS: &[&str] = &[
    "resttemplate",
    "webclient",
    "httpclient",
    "closeablehttpclient",
    "urlconnection",
    "httpurlconnection",
    "okhttpclient",
    "retrofit",
    "feign",
    "webtarget",
    "invocation.builder",
    "requestbody",
    "responseentity",
    "http.get",
    "http.post",
    "http.put",
    "http.delete",
    "@getmapping",
    "@postmapping",
    "@putmapping",
    "@deletemapping",
    "@requestmapping",
];

/// RPC, messaging and raw network access.
pub const RPC_PATTERNS: &[&str] = &[
    "grpc",
    "channel",
    "managedchannel",
    "socket",
    "serversocket",
    "producer.send",
    "consumer.poll",
    "kafkatemplate",
    "rabbittemplate",
    "jmstemplate",
    "sendrequest",
    "sendmessage",
    "publish",
    "subscribe",
];

/// 命中的模式族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoFamily {
    Storage,
    Rest,
    Rpc,
}

/// 外部 I/O 词表
#[derive(Debug, Clone)]
pub struct Lexicon {
    storage: Vec<String>,
    rest: Vec<String>,
    rpc: Vec<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            storage: to_owned_lower(STORAGE_PATTERNS),
            rest: to_owned_lower(REST_PATTERNS),
            rpc: to_owned_lower(RPC_PATTERNS),
        }
    }
}

impl Lexicon {
    /// Built-in families plus the given extra patterns.
    pub fn with_extra(storage: &[String], rest: &[String], rpc: &[String]) -> Self {
        let mut lexicon = Self::default();
        lexicon.storage.extend(normalize(storage));
        lexicon.rest.extend(normalize(rest));
        lexicon.rpc.extend(normalize(rpc));
        lexicon
    }

    /// First family matched by `text`, checked in storage, REST, RPC order.
    pub fn detect(&self, text: &str) -> Option<IoFamily> {
        if text.is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        let haystack = lower.as_bytes();

        if contains_any(haystack, &self.storage) {
            Some(IoFamily::Storage)
        } else if contains_any(haystack, &self.rest) {
            Some(IoFamily::Rest)
        } else if contains_any(haystack, &self.rpc) {
            Some(IoFamily::Rpc)
        } else {
            None
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.storage.len() + self.rest.len() + self.rpc.len()
    }
}

fn contains_any(haystack: &[u8], patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| memmem::find(haystack, p.as_bytes()).is_some())
}

fn to_owned_lower(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_lowercase()).collect()
}

fn normalize(patterns: &[String]) -> impl Iterator<Item = String> + '_ {
    patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
}
