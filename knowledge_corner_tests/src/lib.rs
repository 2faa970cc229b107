use std::time::{SystemTime, UNIX_EPOCH};

use knowledge_corner::client::KnowledgeCornerClient;

/// Address of a running server, `KNOWLEDGE_CORNER_URL` overrides the local default
pub fn server_url() -> String {
    std::env::var("KNOWLEDGE_CORNER_URL").unwrap_or("http://127.0.0.1:5000".to_string())
}

pub fn client() -> anyhow::Result<KnowledgeCornerClient> {
    KnowledgeCornerClient::new(&server_url())
}

/// Name that does not collide with records left by earlier runs
pub fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{} {}", prefix, nanos)
}
