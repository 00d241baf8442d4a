//! Span-to-call matching helpers
//!
//! All matching between spec calls and observed spans is
//! case-insensitive and trim-insensitive on both the service and the
//! operation end. The normalisation lives here so every matcher agrees.

/// Normalise a service or operation name for comparison
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Split a `"serviceAlias.operationId"` call into its two parts.
///
/// Returns `None` when the call has no dot or either side is empty.
pub fn split_call(call: &str) -> Option<(&str, &str)> {
    let (service, operation) = call.trim().split_once('.')?;
    if service.is_empty() || operation.is_empty() {
        return None;
    }
    Some((service, operation))
}

/// The key used to group spans by call target, normalised
pub fn call_key(service: &str, operation: &str) -> String {
    format!("{}.{}", normalize(service), normalize(operation))
}
