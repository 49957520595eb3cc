//! HTTP client for the mail backend API.
//!
//! This is the opaque remote boundary: cursor/token pagination, an
//! envelope around every response, and mutation endpoints taking a
//! resource id plus an action payload. No timeouts are managed here;
//! the transport's failures surface as ordinary `SyncError::Network`.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use url::Url;

use crate::error::{SyncError, SyncResult};

use super::api_types::{into_page, ApiEnvelope, ApiScopeSummary, ApiThread, ApiThreadDetail};
use super::types::{ListPage, MutationKind, Scope, ScopeSummary, ThreadDetail};

/// Mail backend API client.
#[derive(Clone)]
pub struct MailClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl MailClient {
  pub fn new(base_url: &str, token: String) -> SyncResult<Self> {
    let mut base = Url::parse(base_url)
      .map_err(|e| SyncError::Config(format!("invalid backend url '{}': {}", base_url, e)))?;

    // A trailing slash makes Url::join append instead of replace
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }

    Ok(Self {
      http: reqwest::Client::new(),
      base,
      token,
    })
  }

  fn endpoint(&self, path: &str) -> SyncResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| SyncError::Config(format!("invalid endpoint '{}': {}", path, e)))
  }

  async fn get_envelope<T: DeserializeOwned>(&self, url: Url) -> SyncResult<ApiEnvelope<T>> {
    let response = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await?
      .error_for_status()?;

    let envelope: ApiEnvelope<T> = response.json().await?;
    if envelope.status != "ok" {
      return Err(SyncError::Api {
        status: envelope.status,
      });
    }

    Ok(envelope)
  }

  /// Fetch one page of a scope's thread list.
  pub async fn list_page(&self, scope: &Scope, cursor: Option<&str>) -> SyncResult<ListPage> {
    let mut url = self.endpoint("threads")?;
    url
      .query_pairs_mut()
      .append_pair("scope", &scope.request_value());
    if let Some(token) = cursor {
      url.query_pairs_mut().append_pair("pageToken", token);
    }

    let envelope = self.get_envelope::<Vec<ApiThread>>(url).await?;
    Ok(into_page(envelope.data, envelope.meta))
  }

  /// Fetch a single thread in full.
  pub async fn get_thread(&self, id: &str) -> SyncResult<ThreadDetail> {
    let url = self.endpoint(&format!("threads/{}", id))?;
    let envelope = self.get_envelope::<ApiThreadDetail>(url).await?;
    Ok(envelope.data.into_detail())
  }

  /// Fetch the aggregate summary (total/unread counts) for a scope.
  pub async fn scope_summary(&self, scope: &Scope) -> SyncResult<ScopeSummary> {
    let mut url = self.endpoint("summary")?;
    url
      .query_pairs_mut()
      .append_pair("scope", &scope.request_value());

    let envelope = self.get_envelope::<ApiScopeSummary>(url).await?;
    Ok(envelope.data.into_summary(scope.storage_key()))
  }

  /// Apply a mutation to a thread. Returns the backend's acknowledgment;
  /// callers resynchronize through invalidation rather than from the
  /// response body.
  pub async fn modify_thread(&self, id: &str, kind: &MutationKind) -> SyncResult<()> {
    let url = self.endpoint(&format!("threads/{}/modify", id))?;

    let body = match kind {
      MutationKind::MoveColumn { from, to } => json!({
        "action": kind.action(),
        "from": from,
        "to": to,
      }),
      MutationKind::Summarize { text } => json!({
        "action": kind.action(),
        "text": text,
      }),
      _ => json!({ "action": kind.action() }),
    };

    let response = self
      .http
      .post(url)
      .bearer_auth(&self.token)
      .json(&body)
      .send()
      .await?
      .error_for_status()?;

    let envelope: ApiEnvelope<Value> = response.json().await?;
    if envelope.status != "ok" {
      return Err(SyncError::Api {
        status: envelope.status,
      });
    }

    Ok(())
  }
}
