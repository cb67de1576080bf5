//! Logical operations and the ordered route candidates probed for each.
//!
//! The backend's real route naming is not known ahead of time, so every
//! operation carries a fixed preference list. Earlier entries are always
//! tried first; nothing here is adaptive.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use shared::protocol::DeleteMessageRequest;
use url::Url;

use crate::error::{RouteFailure, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    Signup,
    CurrentIdentity,
    ListUsers,
    SearchUsers,
    CreateUser,
    FetchSharedMessages,
    FetchDirectMessages,
    SendSharedMessage,
    SendDirectMessage,
    DeleteMessage,
    RefreshToken,
    SignOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// How the operation argument (peer id, message id, query) reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    None,
    /// Appended as one percent-encoded path segment.
    Segment,
    /// Sent as `?key=<arg>`.
    Query(&'static str),
    /// Constant query pair, no caller argument.
    FixedQuery(&'static str, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    None,
    /// The caller's JSON payload.
    Payload,
    /// `{"id": <arg>}`.
    IdObject,
}

/// What a successful body has to look like for the candidate to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Any,
    /// A bare array, or an object holding the array under the named field.
    List(&'static str),
    /// An object with a non-null value under the named field.
    ObjectWith(&'static str),
}

impl Expect {
    /// Returns the accepted payload, unwrapping nested lists.
    pub fn extract(self, value: Value) -> Result<Value, String> {
        match self {
            Expect::Any => Ok(value),
            Expect::List(field) => match value {
                Value::Array(_) => Ok(value),
                Value::Object(mut object) => match object.remove(field) {
                    Some(list @ Value::Array(_)) => Ok(list),
                    _ => Err(format!("expected an array or an object with `{field}` array")),
                },
                _ => Err(format!("expected an array or an object with `{field}` array")),
            },
            Expect::ObjectWith(field) => match value.get(field) {
                Some(found) if !found.is_null() => Ok(value),
                _ => Err(format!("expected an object with `{field}`")),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub method: HttpMethod,
    pub path: &'static str,
    pub param: Param,
    pub body: Body,
}

const fn route(method: HttpMethod, path: &'static str, param: Param, body: Body) -> Route {
    Route {
        method,
        path,
        param,
        body,
    }
}

use self::{Body as B, HttpMethod as M, Param as P};

static LOGIN: [Route; 2] = [
    route(M::Post, "/api/login", P::None, B::Payload),
    route(M::Post, "/api/signin", P::None, B::Payload),
];

static SIGNUP: [Route; 2] = [
    route(M::Post, "/api/signup", P::None, B::Payload),
    route(M::Post, "/api/register", P::None, B::Payload),
];

static CURRENT_IDENTITY: [Route; 1] = [route(M::Get, "/api/me", P::None, B::None)];

static LIST_USERS: [Route; 3] = [
    route(M::Get, "/api/users", P::None, B::None),
    route(M::Get, "/api/list-users", P::None, B::None),
    route(M::Get, "/users", P::None, B::None),
];

static SEARCH_USERS: [Route; 1] = [route(M::Get, "/api/search-users", P::Query("q"), B::None)];

static CREATE_USER: [Route; 4] = [
    route(M::Post, "/api/users", P::None, B::Payload),
    route(M::Post, "/api/signup-admin", P::None, B::Payload),
    route(M::Post, "/api/register", P::None, B::Payload),
    route(M::Post, "/api/signup", P::None, B::Payload),
];

static FETCH_SHARED: [Route; 4] = [
    route(M::Get, "/api/messages/global", P::None, B::None),
    route(M::Get, "/api/global/messages", P::None, B::None),
    route(M::Get, "/messages/global", P::None, B::None),
    route(M::Get, "/api/room", P::FixedQuery("room", "global"), B::None),
];

static FETCH_DIRECT: [Route; 4] = [
    route(M::Get, "/api/messages", P::Query("peer"), B::None),
    route(M::Get, "/api/chat", P::Query("peer"), B::None),
    route(M::Get, "/messages", P::Query("peer"), B::None),
    route(M::Get, "/api/dm", P::Query("with"), B::None),
];

static SEND_SHARED: [Route; 3] = [
    route(M::Post, "/api/messages/global", P::None, B::Payload),
    route(M::Post, "/api/global/messages", P::None, B::Payload),
    route(M::Post, "/messages/global", P::None, B::Payload),
];

static SEND_DIRECT: [Route; 3] = [
    route(M::Post, "/api/messages", P::None, B::Payload),
    route(M::Post, "/api/chat", P::None, B::Payload),
    route(M::Post, "/messages", P::None, B::Payload),
];

static DELETE_MESSAGE: [Route; 4] = [
    route(M::Delete, "/api/messages", P::Segment, B::None),
    route(M::Delete, "/messages", P::Segment, B::None),
    route(M::Post, "/api/messages/delete", P::None, B::IdObject),
    route(M::Post, "/api/delete-message", P::None, B::IdObject),
];

static REFRESH_TOKEN: [Route; 1] = [route(M::Post, "/api/refresh", P::None, B::Payload)];

static SIGN_OUT: [Route; 1] = [route(M::Post, "/api/logout", P::None, B::None)];

impl Operation {
    pub fn routes(self) -> &'static [Route] {
        match self {
            Operation::Login => &LOGIN,
            Operation::Signup => &SIGNUP,
            Operation::CurrentIdentity => &CURRENT_IDENTITY,
            Operation::ListUsers => &LIST_USERS,
            Operation::SearchUsers => &SEARCH_USERS,
            Operation::CreateUser => &CREATE_USER,
            Operation::FetchSharedMessages => &FETCH_SHARED,
            Operation::FetchDirectMessages => &FETCH_DIRECT,
            Operation::SendSharedMessage => &SEND_SHARED,
            Operation::SendDirectMessage => &SEND_DIRECT,
            Operation::DeleteMessage => &DELETE_MESSAGE,
            Operation::RefreshToken => &REFRESH_TOKEN,
            Operation::SignOut => &SIGN_OUT,
        }
    }

    pub fn expect(self) -> Expect {
        match self {
            Operation::Login | Operation::Signup | Operation::RefreshToken => {
                Expect::ObjectWith("token")
            }
            Operation::ListUsers => Expect::List("users"),
            Operation::SearchUsers => Expect::List("results"),
            Operation::FetchSharedMessages | Operation::FetchDirectMessages => {
                Expect::List("messages")
            }
            Operation::CurrentIdentity
            | Operation::CreateUser
            | Operation::SendSharedMessage
            | Operation::SendDirectMessage
            | Operation::DeleteMessage
            | Operation::SignOut => Expect::Any,
        }
    }

    /// Credential exchanges never carry the bearer token.
    pub fn requires_auth(self) -> bool {
        !matches!(
            self,
            Operation::Login | Operation::Signup | Operation::RefreshToken
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Signup => "signup",
            Operation::CurrentIdentity => "current_identity",
            Operation::ListUsers => "list_users",
            Operation::SearchUsers => "search_users",
            Operation::CreateUser => "create_user",
            Operation::FetchSharedMessages => "fetch_shared_messages",
            Operation::FetchDirectMessages => "fetch_direct_messages",
            Operation::SendSharedMessage => "send_shared_message",
            Operation::SendDirectMessage => "send_direct_message",
            Operation::DeleteMessage => "delete_message",
            Operation::RefreshToken => "refresh_token",
            Operation::SignOut => "sign_out",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-call inputs shared by every candidate of an operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteArgs {
    pub param: Option<String>,
    pub payload: Option<Value>,
}

impl RouteArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn param(value: impl Into<String>) -> Self {
        Self {
            param: Some(value.into()),
            payload: None,
        }
    }

    pub fn json<T: Serialize>(payload: &T) -> Result<Self, SyncError> {
        Ok(Self {
            param: None,
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    fn require_param(&self) -> Result<&str, RouteFailure> {
        self.param
            .as_deref()
            .ok_or_else(|| RouteFailure::Request("route requires an argument".to_string()))
    }
}

impl Route {
    pub fn url(&self, base_url: &str, args: &RouteArgs) -> Result<Url, RouteFailure> {
        let mut url = Url::parse(&format!("{}{}", base_url.trim_end_matches('/'), self.path))
            .map_err(|err| RouteFailure::Request(format!("invalid url: {err}")))?;

        match self.param {
            Param::None => {}
            Param::Segment => {
                let value = args.require_param()?;
                url.path_segments_mut()
                    .map_err(|_| RouteFailure::Request("base url cannot carry a path".to_string()))?
                    .push(value);
            }
            Param::Query(key) => {
                let value = args.require_param()?;
                url.query_pairs_mut().append_pair(key, value);
            }
            Param::FixedQuery(key, value) => {
                url.query_pairs_mut().append_pair(key, value);
            }
        }

        Ok(url)
    }

    pub fn body(&self, args: &RouteArgs) -> Result<Option<Value>, RouteFailure> {
        match self.body {
            Body::None => Ok(None),
            Body::Payload => Ok(args.payload.clone()),
            Body::IdObject => {
                let request = DeleteMessageRequest {
                    id: args.require_param()?.to_string(),
                };
                serde_json::to_value(request)
                    .map(Some)
                    .map_err(|err| RouteFailure::Request(format!("invalid body: {err}")))
            }
        }
    }
}
