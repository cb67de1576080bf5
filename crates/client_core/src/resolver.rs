use std::future::Future;

use reqwest::{header::CONTENT_TYPE, Client};
use serde_json::Value;
use shared::error::error_message_from_body;
use tracing::{debug, warn};

use crate::{
    error::{RouteFailure, SyncError},
    routes::{Expect, Operation, Route, RouteArgs},
};

/// Outcome of walking a candidate list without a single success.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: usize,
    pub last: Option<E>,
}

/// Tries `attempt` on each candidate in order and returns the first success.
///
/// Later candidates are never touched once one succeeds.
pub async fn attempt_in_order<I, C, T, E, F, Fut>(
    candidates: I,
    mut attempt: F,
) -> Result<(usize, T), Exhausted<E>>
where
    I: IntoIterator<Item = C>,
    F: FnMut(usize, C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut last = None;
    for (index, candidate) in candidates.into_iter().enumerate() {
        attempts += 1;
        match attempt(index, candidate).await {
            Ok(value) => return Ok((index, value)),
            Err(err) => last = Some(err),
        }
    }
    Err(Exhausted { attempts, last })
}

#[derive(Clone)]
pub struct Resolver {
    http: Client,
    base_url: String,
}

impl Resolver {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn resolve(
        &self,
        operation: Operation,
        args: &RouteArgs,
        token: Option<&str>,
    ) -> Result<Value, SyncError> {
        let expect = operation.expect();
        let routes = operation.routes().iter().copied();
        let result = attempt_in_order(routes, |index, route| async move {
            let outcome = self.attempt(&route, expect, args, token).await;
            if let Err(err) = &outcome {
                debug!(
                    operation = operation.name(),
                    attempt = index + 1,
                    "route candidate rejected: {err}"
                );
            }
            outcome
        })
        .await;

        match result {
            Ok((index, value)) => {
                debug!(
                    operation = operation.name(),
                    path = operation.routes()[index].path,
                    attempt = index + 1,
                    "route resolved"
                );
                Ok(value)
            }
            Err(exhausted) => {
                let last = exhausted.last.unwrap_or_else(|| {
                    RouteFailure::Request(format!("no route candidates configured for {operation}"))
                });
                warn!(
                    operation = operation.name(),
                    attempts = exhausted.attempts,
                    "all route candidates failed: {last}"
                );
                Err(SyncError::NoRouteAvailable {
                    operation,
                    attempts: exhausted.attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    async fn attempt(
        &self,
        route: &Route,
        expect: Expect,
        args: &RouteArgs,
        token: Option<&str>,
    ) -> Result<Value, RouteFailure> {
        let url = route.url(&self.base_url, args)?;
        let method = route.method.as_str();
        let url_text = url.to_string();

        let mut request = self.http.request(route.method.into(), url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = route.body(args)? {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|err| RouteFailure::Transport {
            method,
            url: url_text.clone(),
            message: err.to_string(),
        })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = error_message_from_body(&raw).unwrap_or_else(|| status.to_string());
            return Err(RouteFailure::Status {
                method,
                url: url_text,
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await.map_err(|err| RouteFailure::Transport {
            method,
            url: url_text.clone(),
            message: err.to_string(),
        })?;

        let value = if is_json && !bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_slice::<Value>(&bytes).map_err(|err| RouteFailure::Shape {
                method,
                url: url_text.clone(),
                detail: format!("invalid json: {err}"),
            })?
        } else {
            Value::Object(Default::default())
        };

        expect.extract(value).map_err(|detail| RouteFailure::Shape {
            method,
            url: url_text,
            detail,
        })
    }
}

#[cfg(test)]
#[path = "tests/resolver_tests.rs"]
mod tests;
