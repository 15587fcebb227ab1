//! The annotation source state machine.
//!
//! An item moves from unknown to fetched (present in the store), then to
//! modified and committed, or to deleted. None of this is persisted: the
//! state is whatever the store holds. Writes update the store first and
//! then go to the network; a failed write is never rolled back, so callers
//! re-sync with [`AnnotationSource::download_metadata`] or
//! [`AnnotationSource::download_bulk`] after an error.

use std::sync::Arc;

use annolink_core::id::{parse_id, require_id};
use annolink_core::wire::{decode_bulk, decode_single, parse_record, to_wire};
use annolink_core::{Annotation, AnnotationGeometryBatch, AnnotationStore, CoreError};
use annolink_fetch::{
    fetch_plain, fetch_with_credentials, response_bytes, CredentialProvider, FetchConfig,
    FetchError, HttpRequest, HttpResponse, HttpTransport,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Backend, BulkMode, ChunkBounds, SourceParameters};
use crate::error::{SourceError, SourceResult};
use crate::events::AnnotationChange;

/// Capacity of the change notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Prefix of ids handed out for annotations that were kept local because
/// the source is read-only.
pub const LOCAL_ID_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// AnnotationSource
// ---------------------------------------------------------------------------

/// Downloads and mutates annotations on one DVID instance or Clio dataset.
///
/// Each source owns its own [`AnnotationStore`], so two sources never see
/// each other's cached records.
pub struct AnnotationSource {
    parameters: SourceParameters,
    transport: Arc<dyn HttpTransport>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    fetch_config: FetchConfig,
    store: AnnotationStore,
    events: Option<broadcast::Sender<AnnotationChange>>,
}

impl AnnotationSource {
    /// Create a source. Without a credential provider, requests are sent
    /// unauthenticated and auth failures are terminal.
    pub fn new(
        parameters: SourceParameters,
        transport: Arc<dyn HttpTransport>,
        credentials: Option<Arc<dyn CredentialProvider>>,
        fetch_config: FetchConfig,
    ) -> Self {
        let events = parameters
            .notify
            .then(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        Self {
            parameters,
            transport,
            credentials,
            fetch_config,
            store: AnnotationStore::new(),
            events,
        }
    }

    pub fn parameters(&self) -> &SourceParameters {
        &self.parameters
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    /// Subscribe to change notifications. `None` unless the source was
    /// configured to notify.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<AnnotationChange>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Id an annotation has (or would get) on this source.
    pub fn id_of(&self, annotation: &Annotation) -> String {
        self.parameters.id_scheme().id_of(annotation)
    }

    /// Whether `annotation` may be written to the server.
    pub fn is_uploadable(&self, annotation: &Annotation) -> bool {
        if self.parameters.user().is_none() {
            return false;
        }
        !self.parameters.require_title || annotation.title().is_some_and(|t| !t.trim().is_empty())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Download every annotation in `bounds` (or, in tag mode, every
    /// annotation carrying the configured tag).
    ///
    /// Records that fail to decode are skipped. Each decoded record is
    /// cached in the store under its id.
    pub async fn download_bulk(
        &self,
        bounds: &ChunkBounds,
        cancel: &CancellationToken,
    ) -> SourceResult<AnnotationGeometryBatch> {
        let url = match (&self.parameters.backend, &self.parameters.bulk_mode) {
            (Backend::Dvid(dvid), BulkMode::Spatial) => dvid.range_url(bounds)?,
            (Backend::Dvid(dvid), BulkMode::Tagged(tag)) => dvid.tag_url(tag)?,
            (Backend::Clio(clio), BulkMode::Spatial) => clio.bulk_url(None)?,
            (Backend::Clio(clio), BulkMode::Tagged(tag)) => clio.bulk_url(Some(tag))?,
        };

        let body = self.fetch(HttpRequest::get(&url), response_bytes, cancel).await?;
        let mut batch = AnnotationGeometryBatch::new();
        let Some(payload) = decode_payload(&body)? else {
            return Ok(batch);
        };

        let scheme = self.parameters.id_scheme();
        for record in decode_bulk(&payload, &self.parameters.default_kind) {
            let id = scheme.id_of(&record.annotation);
            self.store.add(&id, record.raw);
            batch.push(id.clone(), &record.annotation);
            if self.events.is_some() {
                let description = record.annotation.rendered_description();
                self.notify(AnnotationChange::Loaded {
                    id,
                    annotation: record.annotation,
                    description,
                });
            }
        }

        tracing::debug!(url = %url, count = batch.len(), "Downloaded annotations");
        Ok(batch)
    }

    /// Look up a single annotation.
    ///
    /// The store is consulted first; only a miss goes to the network. A
    /// missing, empty or failed response yields `Ok(None)`. Cancellation
    /// is still reported as an error.
    pub async fn download_metadata(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<Annotation>> {
        if let Some(raw) = self.store.get(id) {
            return Ok(
                match parse_record(Some(id), &raw, &self.parameters.default_kind) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(id, error = %e, "Cached annotation record is unreadable");
                        None
                    }
                },
            );
        }
        if id.starts_with(LOCAL_ID_PREFIX) {
            return Ok(None);
        }

        match self.fetch_metadata(id, cancel).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(id, error = %e, "Annotation metadata unavailable");
                Ok(None)
            }
        }
    }

    async fn fetch_metadata(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> SourceResult<Option<Annotation>> {
        let url = match &self.parameters.backend {
            Backend::Dvid(dvid) => match parse_id(id) {
                Some(parsed) => dvid.element_url(&parsed)?,
                None => return Ok(None),
            },
            Backend::Clio(clio) => clio.element_url(id)?,
        };

        let body = self.fetch(HttpRequest::get(url), response_bytes, cancel).await?;
        let Some(payload) = decode_payload(&body)? else {
            return Ok(None);
        };
        let record = match payload {
            Value::Object(mut keyed) if keyed.get(id).is_some_and(|v| !v.is_string()) => {
                keyed.remove(id).unwrap_or(Value::Null)
            }
            other => other,
        };

        let Some(decoded) = decode_single(id, &record, &self.parameters.default_kind)? else {
            return Ok(None);
        };
        self.store.add(id, decoded.raw);
        Ok(Some(decoded.annotation))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write a new annotation and return its id.
    ///
    /// The id is computed locally before the write. When the source is not
    /// uploadable the annotation is kept local under a `local-<uuid>` id
    /// and nothing is sent.
    pub async fn add(&self, annotation: &Annotation, cancel: &CancellationToken) -> SourceResult<String> {
        if !self.is_uploadable(annotation) {
            return Ok(self.keep_local(annotation));
        }

        let (id, record) = self.encode(annotation)?;
        let request = self.write_request(vec![record.clone()])?;
        self.store.add(&id, record);
        self.fetch(request, response_bytes, cancel).await?;

        tracing::info!(id = %id, "Annotation added");
        self.notify(AnnotationChange::Added { id: id.clone() });
        Ok(id)
    }

    /// Write several annotations with a single request. Ids are returned
    /// in input order; annotations that are not uploadable are kept local
    /// as in [`AnnotationSource::add`].
    pub async fn add_batch(
        &self,
        annotations: &[Annotation],
        cancel: &CancellationToken,
    ) -> SourceResult<Vec<String>> {
        let mut ids = Vec::with_capacity(annotations.len());
        let mut pending = Vec::new();
        for annotation in annotations {
            if self.is_uploadable(annotation) {
                let (id, record) = self.encode(annotation)?;
                ids.push(id.clone());
                pending.push((id, record));
            } else {
                ids.push(self.keep_local(annotation));
            }
        }
        if pending.is_empty() {
            return Ok(ids);
        }

        let records: Vec<Value> = pending.iter().map(|(_, record)| record.clone()).collect();
        let request = self.write_request(records)?;
        for (id, record) in &pending {
            self.store.add(id, record.clone());
        }
        self.fetch(request, response_bytes, cancel).await?;

        tracing::info!(count = pending.len(), "Annotations added");
        for (id, _) in pending {
            self.notify(AnnotationChange::Added { id });
        }
        Ok(ids)
    }

    /// Rewrite the annotation stored under `old_id` and return its id
    /// afterwards.
    ///
    /// When the position changed, the annotation is written under its new
    /// id and the old record is deleted only once that write succeeded.
    /// The two requests are not atomic: a failure or cancellation between
    /// them leaves both records on the server. A local preview id keeps its
    /// id and only its stored record is refreshed. Any other `old_id` that
    /// matches no id grammar is ignored.
    pub async fn update(
        &self,
        old_id: &str,
        annotation: &Annotation,
        cancel: &CancellationToken,
    ) -> SourceResult<String> {
        if old_id.starts_with(LOCAL_ID_PREFIX) {
            if self.store.contains(old_id) {
                let record = to_wire(annotation, None, self.parameters.dialect());
                self.store.update(old_id, record);
                tracing::debug!(id = old_id, "Local annotation refreshed");
            }
            return Ok(old_id.to_string());
        }
        if parse_id(old_id).is_none() {
            tracing::debug!(id = old_id, "Ignoring update of unrecognized id");
            return Ok(old_id.to_string());
        }
        if !self.is_uploadable(annotation) {
            return Err(SourceError::PermissionDenied(format!(
                "cannot update {old_id}: source is read-only"
            )));
        }

        let mut moved = annotation.clone();
        moved.id = None;
        let (new_id, record) = self.encode(&moved)?;

        if new_id == old_id {
            let request = self.write_request(vec![record.clone()])?;
            self.store.update(old_id, record);
            self.fetch(request, response_bytes, cancel).await?;
        } else {
            let request = self.write_request(vec![record.clone()])?;
            self.store.add(&new_id, record);
            self.fetch(request, response_bytes, cancel).await?;
            self.delete_remote(old_id, cancel).await?;
        }

        tracing::info!(old_id, new_id = %new_id, "Annotation updated");
        self.notify(AnnotationChange::Updated {
            old_id: old_id.to_string(),
            new_id: new_id.clone(),
        });
        Ok(new_id)
    }

    /// Delete an annotation. An id that matches no id grammar is ignored.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> SourceResult<()> {
        if parse_id(id).is_none() {
            if id.starts_with(LOCAL_ID_PREFIX) {
                self.store.remove(id);
            }
            tracing::debug!(id, "Ignoring delete of unrecognized id");
            return Ok(());
        }
        if self.parameters.user().is_none() {
            return Err(SourceError::PermissionDenied(format!(
                "cannot delete {id}: source is read-only"
            )));
        }

        self.delete_remote(id, cancel).await?;
        tracing::info!(id, "Annotation deleted");
        self.notify(AnnotationChange::Deleted { id: id.to_string() });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn delete_remote(&self, id: &str, cancel: &CancellationToken) -> SourceResult<()> {
        let user = self.parameters.user();
        let url = match &self.parameters.backend {
            Backend::Dvid(dvid) => {
                let parsed = require_id(id)?;
                dvid.delete_url(&parsed, user)?
            }
            Backend::Clio(clio) => clio.delete_url(id, user)?,
        };
        self.store.remove(id);
        self.fetch(HttpRequest::delete(url), response_bytes, cancel).await?;
        Ok(())
    }

    /// Id and wire record for an annotation about to be written.
    fn encode(&self, annotation: &Annotation) -> SourceResult<(String, Value)> {
        if matches!(self.parameters.backend, Backend::Dvid(_)) && !annotation.is_point() {
            return Err(SourceError::Unsupported(
                "DVID annotation instances store points only".to_string(),
            ));
        }
        let id = self.id_of(annotation);
        let record = to_wire(annotation, self.parameters.user(), self.parameters.dialect());
        Ok((id, record))
    }

    /// POST request for `records`. DVID always takes an array; Clio takes
    /// a bare record for single writes.
    fn write_request(&self, mut records: Vec<Value>) -> SourceResult<HttpRequest> {
        let user = self.parameters.user();
        let request = match &self.parameters.backend {
            Backend::Dvid(dvid) => HttpRequest::post_json(dvid.write_url(user)?, &Value::Array(records)),
            Backend::Clio(clio) => {
                let body = if records.len() == 1 {
                    records.remove(0)
                } else {
                    Value::Array(records)
                };
                HttpRequest::post_json(clio.write_url(user)?, &body)
            }
        };
        Ok(request)
    }

    fn keep_local(&self, annotation: &Annotation) -> String {
        let id = format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4());
        let record = to_wire(annotation, None, self.parameters.dialect());
        self.store.add(&id, record);
        tracing::debug!(id = %id, "Source is read-only, annotation kept local");
        id
    }

    fn notify(&self, change: AnnotationChange) {
        if let Some(tx) = &self.events {
            // No receivers is fine.
            let _ = tx.send(change);
        }
    }

    async fn fetch<T, F>(&self, request: HttpRequest, transform: F, cancel: &CancellationToken) -> SourceResult<T>
    where
        F: FnOnce(HttpResponse) -> Result<T, FetchError>,
    {
        let result = match &self.credentials {
            Some(provider) => {
                fetch_with_credentials(
                    provider.as_ref(),
                    self.transport.as_ref(),
                    request,
                    transform,
                    &self.fetch_config,
                    cancel,
                )
                .await
            }
            None => {
                fetch_plain(
                    self.transport.as_ref(),
                    request,
                    transform,
                    &self.fetch_config,
                    cancel,
                )
                .await
            }
        };
        Ok(result?)
    }
}

/// Parse a response body as JSON. Blank bodies yield `None`.
fn decode_payload(body: &[u8]) -> SourceResult<Option<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value = serde_json::from_slice(body).map_err(CoreError::from)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_bodies_decode_to_none() {
        assert_eq!(decode_payload(b"").unwrap(), None);
        assert_eq!(decode_payload(b" \n").unwrap(), None);
        assert_eq!(decode_payload(b"{}").unwrap(), Some(serde_json::json!({})));
        assert!(decode_payload(b"{oops").is_err());
    }
}
