use crate::api::Api;
use crate::codec;
use crate::errors::*;
use crate::facts;
use crate::model::{IssuesResult, ScanResult};
use crate::polling::LinearBackoff;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct DepGraphAttributes {
    in_progress: bool,
    #[serde(default)]
    start_time: Option<Value>,
    #[serde(default)]
    dep_graph_data: Option<Value>,
    #[serde(default)]
    component_details: Option<Value>,
}

fn malformed(msg: impl Into<String>) -> PollError {
    PollError::Malformed(msg.into())
}

async fn wait_for_depgraph(
    api: &dyn Api,
    id: &str,
    backoff: &LinearBackoff,
) -> Result<DepGraphAttributes, PollError> {
    let mut attempts = 0;
    while attempts < backoff.max_attempts {
        attempts += 1;
        let mut body = api.get_depgraph(id).await?;
        let attributes = body
            .pointer_mut("/data/attributes")
            .map(Value::take)
            .ok_or_else(|| malformed("depgraph response without attributes"))?;
        let attributes: DepGraphAttributes = serde_json::from_value(attributes)
            .map_err(|err| malformed(format!("invalid depgraph attributes: {}", err)))?;

        if !attributes.in_progress {
            if attributes.dep_graph_data.is_none() {
                return Err(malformed("resolved depgraph without dep_graph_data"));
            }
            debug!("Depgraph {} resolved after {} attempt(s)", id, attempts);
            return Ok(attributes);
        }

        if attempts < backoff.max_attempts {
            let interval = backoff.interval(attempts);
            debug!(
                "Depgraph {} still in progress (attempt {}/{}), waiting {:?}",
                id, attempts, backoff.max_attempts, interval
            );
            tokio::time::sleep(interval).await;
        }
    }
    Err(PollError::Exhausted { attempts })
}

pub async fn resolve_issues(
    api: &dyn Api,
    scan_result: &ScanResult,
    backoff: &LinearBackoff,
) -> Result<IssuesResult> {
    let hashes = facts::file_hashes(scan_result)?;

    let created = api.create_depgraph(&hashes).await?;
    let id = created
        .pointer("/data/id")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("depgraph submission answered without an id"))?;
    debug!("Submitted {} file signatures as depgraph {}", hashes.hashes.len(), id);

    let attributes = wait_for_depgraph(api, id, backoff).await?;

    let request = json!({
        "data": {
            "type": "issues",
            "attributes": {
                "start_time": attributes.start_time,
                "dep_graph": attributes.dep_graph_data,
                "component_details": attributes.component_details.unwrap_or_else(|| json!({})),
            }
        }
    });
    let mut response = api.get_issues(&request).await?;
    let result = response
        .pointer_mut("/data/result")
        .map(Value::take)
        .ok_or_else(|| malformed("issues response without result"))?;
    let result = codec::decode_issues_result(result)
        .map_err(|err| malformed(format!("invalid issues result: {}", err)))?;
    Ok(result)
}
