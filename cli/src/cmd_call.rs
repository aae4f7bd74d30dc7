//! `chainpubsub call` — one request/response over the PubSub socket.

use anyhow::{Context, Result};
use serde_json::Value;

use chainpubsub_ws::PubSubClient;

pub async fn run(client: &PubSubClient, method: &str, params: &str) -> Result<()> {
    let params = parse_params(params)?;
    let result: Value = client
        .call(method, params)
        .await
        .with_context(|| format!("{method} failed"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    client.disconnect().await;
    Ok(())
}

fn parse_params(raw: &str) -> Result<Vec<Value>> {
    serde_json::from_str(raw).context("--params must be a JSON array")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_parse_as_array() {
        let params = parse_params(r#"["Acct1", {"commitment": "finalized"}]"#).unwrap();
        assert_eq!(params, vec![json!("Acct1"), json!({"commitment": "finalized"})]);
    }

    #[test]
    fn non_array_params_are_rejected() {
        assert!(parse_params(r#"{"a": 1}"#).is_err());
        assert!(parse_params("").is_err());
    }
}
