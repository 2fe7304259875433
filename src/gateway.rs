// 🔌 Gateway Client - authenticated calls to the Pin Payments API
//
// Every call yields a `GatewayReply` and never raises: transport problems and
// undecodable bodies become `GatewayResponse::TransportFailure`, gateway
// rejections become `GatewayResponse::Error`. Callers that must propagate
// failures use `GatewayReply::into_result`.

use crate::environment::{EnvironmentResolver, PinEnvironment};
use crate::error::{PinError, Result};
use crate::wire::{ErrorResponse, Pagination, Payload};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// REQUEST / RAW RESPONSE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: String,
    pub params: Payload,
}

impl GatewayRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Moves one request over the wire. `secret` goes in the Basic-auth username
/// slot with an empty password.
pub trait Transport {
    fn send(&self, secret: &str, request: &GatewayRequest) -> std::result::Result<RawResponse, String>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, secret: &str, request: &GatewayRequest) -> std::result::Result<RawResponse, String> {
        (**self).send(secret, request)
    }
}

/// Production transport on `reqwest::blocking`
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, secret: &str, request: &GatewayRequest) -> std::result::Result<RawResponse, String> {
        let params = request.params.pairs();

        let builder = match request.method {
            Method::Get => self.client.get(&request.url).query(params),
            Method::Post => self.client.post(&request.url).form(params),
            Method::Put => self.client.put(&request.url).form(params),
            Method::Delete => self.client.delete(&request.url).form(params),
        };

        let response = builder
            .basic_auth(secret, Some(""))
            .send()
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| e.to_string())?;

        Ok(RawResponse { status, body })
    }
}

// ============================================================================
// RESPONSE SUM TYPE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse<R> {
    /// `"response"` object decoded into `R`
    Success(R),

    /// Body carried an `"error"` key
    Error(ErrorResponse),

    /// No usable JSON came back
    TransportFailure,
}

impl<R> GatewayResponse<R> {
    pub fn map<S, F: FnOnce(R) -> S>(self, f: F) -> GatewayResponse<S> {
        match self {
            GatewayResponse::Success(r) => GatewayResponse::Success(f(r)),
            GatewayResponse::Error(e) => GatewayResponse::Error(e),
            GatewayResponse::TransportFailure => GatewayResponse::TransportFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GatewayResponse::Success(_))
    }
}

impl<R: DeserializeOwned> GatewayResponse<R> {
    pub fn parse(body: &str) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("Pin response is not JSON: {}", e);
                return GatewayResponse::TransportFailure;
            }
        };

        if value.get("error").is_some() {
            return GatewayResponse::Error(ErrorResponse::from_value(&value));
        }

        match value.get("response").cloned().map(serde_json::from_value::<R>) {
            Some(Ok(data)) => GatewayResponse::Success(data),
            Some(Err(e)) => {
                warn!("Pin response body did not match expected shape: {}", e);
                GatewayResponse::TransportFailure
            }
            None => {
                warn!("Pin response has neither \"response\" nor \"error\"");
                GatewayResponse::TransportFailure
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReply<R> {
    /// Raw response body, `None` when the transport itself failed
    pub raw_text: Option<String>,
    pub status: Option<u16>,
    pub is_payment: bool,
    pub outcome: GatewayResponse<R>,
}

impl<R> GatewayReply<R> {
    /// Success payload or a labelled `PinError::Gateway`
    pub fn into_result(self) -> Result<R> {
        let payment = self.is_payment;

        match self.outcome {
            GatewayResponse::Success(data) => match self.status {
                Some(status) if !(200..300).contains(&status) => Err(PinError::Gateway {
                    payment,
                    message: format!("unexpected HTTP status {}", status),
                }),
                _ => Ok(data),
            },
            GatewayResponse::Error(error) => Err(PinError::Gateway {
                payment,
                message: error.message(),
            }),
            GatewayResponse::TransportFailure => Err(PinError::Gateway {
                payment,
                message: match self.status {
                    Some(status) => format!("no parsable response (HTTP {})", status),
                    None => "no response".to_string(),
                },
            }),
        }
    }
}

// ============================================================================
// GATEWAY + CLIENT
// ============================================================================

/// Resolver + transport. Hands out clients bound to one environment.
pub struct Gateway<T: Transport> {
    resolver: EnvironmentResolver,
    transport: T,
}

impl<T: Transport> Gateway<T> {
    pub fn new(resolver: EnvironmentResolver, transport: T) -> Self {
        Gateway { resolver, transport }
    }

    pub fn resolver(&self) -> &EnvironmentResolver {
        &self.resolver
    }

    pub fn client(&self, environment: Option<&str>) -> Result<GatewayClient<'_, T>> {
        let environment = self.resolver.resolve(environment)?;
        Ok(GatewayClient {
            environment,
            transport: &self.transport,
        })
    }
}

pub struct GatewayClient<'a, T: Transport> {
    environment: PinEnvironment,
    transport: &'a T,
}

impl<'a, T: Transport> GatewayClient<'a, T> {
    pub fn environment(&self) -> &PinEnvironment {
        &self.environment
    }

    pub fn get<R: DeserializeOwned>(&self, path: &str) -> GatewayReply<R> {
        self.exchange(Method::Get, path, Payload::new(), false)
    }

    /// Every item of a paginated list endpoint, following `pagination.next`
    /// until the last page. Any failed page fails the whole call.
    pub fn get_all<R: DeserializeOwned>(&self, path: &str) -> Result<Vec<R>> {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let reply: GatewayReply<Vec<R>> =
                self.exchange(Method::Get, path, Payload::new().field("page", page), false);
            let next = reply
                .raw_text
                .as_deref()
                .and_then(Pagination::from_body)
                .and_then(|p| p.next);

            items.extend(reply.into_result()?);

            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }

        Ok(items)
    }

    pub fn post<R: DeserializeOwned>(&self, path: &str, payload: Payload, is_payment: bool) -> GatewayReply<R> {
        self.exchange(Method::Post, path, payload, is_payment)
    }

    pub fn put<R: DeserializeOwned>(&self, path: &str, payload: Payload) -> GatewayReply<R> {
        self.exchange(Method::Put, path, payload, false)
    }

    /// DELETE answers 204 with an empty body on success
    pub fn delete(&self, path: &str) -> GatewayReply<()> {
        let request = self.request(Method::Delete, path, Payload::new());

        match self.transport.send(&self.environment.secret, &request) {
            Ok(raw) if raw.is_success() && raw.body.trim().is_empty() => GatewayReply {
                status: Some(raw.status),
                raw_text: Some(raw.body),
                is_payment: false,
                outcome: GatewayResponse::Success(()),
            },
            Ok(raw) => GatewayReply {
                status: Some(raw.status),
                outcome: GatewayResponse::<Value>::parse(&raw.body).map(|_| ()),
                raw_text: Some(raw.body),
                is_payment: false,
            },
            Err(e) => self.transport_failure(&request, e, false),
        }
    }

    fn request(&self, method: Method, path: &str, params: Payload) -> GatewayRequest {
        GatewayRequest {
            method,
            url: self.environment.url(path),
            params,
        }
    }

    fn exchange<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Payload,
        is_payment: bool,
    ) -> GatewayReply<R> {
        let request = self.request(method, path, params);
        debug!("{} {} ({})", method.as_str(), request.url, self.environment.name);

        match self.transport.send(&self.environment.secret, &request) {
            Ok(raw) => GatewayReply {
                status: Some(raw.status),
                outcome: GatewayResponse::parse(&raw.body),
                raw_text: Some(raw.body),
                is_payment,
            },
            Err(e) => self.transport_failure(&request, e, is_payment),
        }
    }

    fn transport_failure<R>(&self, request: &GatewayRequest, error: String, is_payment: bool) -> GatewayReply<R> {
        warn!("{} {} failed: {}", request.method.as_str(), request.url, error);
        GatewayReply {
            raw_text: None,
            status: None,
            is_payment,
            outcome: GatewayResponse::TransportFailure,
        }
    }
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{EnvironmentConfig, PinConfig};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted transport: replays queued replies, records every request
    #[derive(Default)]
    pub struct StubTransport {
        replies: RefCell<VecDeque<std::result::Result<RawResponse, String>>>,
        requests: RefCell<Vec<GatewayRequest>>,
        secrets: RefCell<Vec<String>>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            StubTransport::default()
        }

        pub fn reply(self, status: u16, body: Value) -> Self {
            self.reply_raw(status, &body.to_string())
        }

        pub fn reply_raw(self, status: u16, body: &str) -> Self {
            self.replies.borrow_mut().push_back(Ok(RawResponse {
                status,
                body: body.to_string(),
            }));
            self
        }

        pub fn fail(self, error: &str) -> Self {
            self.replies.borrow_mut().push_back(Err(error.to_string()));
            self
        }

        pub fn requests(&self) -> Vec<GatewayRequest> {
            self.requests.borrow().clone()
        }

        pub fn secrets(&self) -> Vec<String> {
            self.secrets.borrow().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Transport for StubTransport {
        fn send(&self, secret: &str, request: &GatewayRequest) -> std::result::Result<RawResponse, String> {
            self.requests.borrow_mut().push(request.clone());
            self.secrets.borrow_mut().push(secret.to_string());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply".to_string()))
        }
    }

    pub fn test_config() -> PinConfig {
        PinConfig::default()
            .with_environment("test", EnvironmentConfig::new("test-api.pinpayments.com", "sk_test"))
            .with_environment("live", EnvironmentConfig::new("api.pinpayments.com", "sk_live"))
    }

    pub fn test_gateway(stub: &StubTransport) -> Gateway<&StubTransport> {
        Gateway::new(EnvironmentResolver::new(test_config()), stub)
    }
}
