//! The request view the verifier works on, and signature base construction.

use bon::Builder;
use bytes::Bytes;

use super::fields::{BareItem, Item, Member, Parameters};

/// The parts of an inbound HTTP request that signatures can cover.
///
/// Header names are matched case-insensitively. Repeated headers are
/// combined in order, joined with `", "`.
#[derive(Debug, Clone, Builder)]
pub struct SignedRequest {
    /// Request method, e.g. `POST`.
    #[builder(into)]
    pub method: String,
    /// URI scheme.
    #[builder(into, default = String::from("https"))]
    pub scheme: String,
    /// Host and optional port.
    #[builder(into)]
    pub authority: String,
    /// Absolute path, without the query.
    #[builder(into)]
    pub path: String,
    /// Query string without the leading `?`.
    #[builder(into)]
    pub query: Option<String>,
    /// Header fields in arrival order.
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    /// Raw body.
    #[builder(default)]
    pub body: Bytes,
}

impl SignedRequest {
    /// Appends a header field.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The combined value of header `name`, or `None` if absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    fn target_uri(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority, self.request_target())
    }

    fn request_target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// The canonical value of one covered component.
    ///
    /// Returns `None` when the component is absent from the request, carries
    /// parameters that are not supported, or is not a string.
    #[must_use]
    pub fn component_value(&self, component: &Item) -> Option<String> {
        let BareItem::String(name) = &component.value else {
            return None;
        };
        if !component.params.is_empty() {
            return None;
        }
        match name.as_str() {
            "@method" => Some(self.method.to_ascii_uppercase()),
            "@target-uri" => Some(self.target_uri()),
            "@authority" => Some(self.authority.to_ascii_lowercase()),
            "@scheme" => Some(self.scheme.to_ascii_lowercase()),
            "@request-target" => Some(self.request_target()),
            "@path" => Some(if self.path.is_empty() { "/".to_owned() } else { self.path.clone() }),
            "@query" => Some(format!("?{}", self.query.as_deref().unwrap_or_default())),
            derived if derived.starts_with('@') => None,
            field if field.bytes().all(|c| !c.is_ascii_uppercase()) => self.header(field),
            _ => None,
        }
    }
}

/// Builds the signature base for one signature.
///
/// `covered` and `params` are the inner list and its parameters from the
/// `Signature-Input` member; the `@signature-params` line is their
/// canonical serialization. Returns `None` if any covered component is
/// missing or repeated.
#[must_use]
pub fn signature_base(
    request: &SignedRequest,
    covered: &[Item],
    params: &Parameters,
) -> Option<String> {
    let mut base = String::new();
    for (i, component) in covered.iter().enumerate() {
        if covered[..i].contains(component) {
            return None;
        }
        let value = request.component_value(component)?;
        base.push_str(&format!("{component}: {value}\n"));
    }
    let signature_params = Member::InnerList(covered.to_vec(), params.clone());
    base.push_str(&format!("\"@signature-params\": {signature_params}"));
    Some(base)
}
