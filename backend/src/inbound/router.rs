//! Route table mapping path segments and verbs to endpoints.
//!
//! Patterns are written like `/connectors/{connector_id}/inspect`: literal
//! segments match exactly and each `{name}` binds one non-empty path
//! component. Routes are tried in registration order; the first match wins.

use std::collections::BTreeMap;

use crate::domain::Error;

/// Every operation the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ListConnectors,
    CreateConnector,
    ReplaceConnector,
    DeleteConnector,
    InspectConnector,
    QueryConnector,
    StartChat,
    AddMessage,
    ListChats,
    DeleteChat,
}

impl Endpoint {
    /// Whether the endpoint can answer with an event stream.
    pub fn streams(self) -> bool {
        matches!(self, Self::StartChat | Self::AddMessage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
struct Route {
    verb: String,
    pattern: Vec<Segment>,
    endpoint: Endpoint,
}

/// A resolved route and its bound path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub endpoint: Endpoint,
    pub bindings: BTreeMap<String, String>,
}

impl RouteMatch {
    /// The path component bound to `name`.
    pub fn param(&self, name: &str) -> Result<&str, Error> {
        self.bindings
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::internal(format!("route has no parameter {name}")))
    }
}

/// Ordered route table.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` for `verb`.
    #[must_use]
    pub fn route(mut self, verb: &str, pattern: &str, endpoint: Endpoint) -> Self {
        let segments = pattern
            .trim_start_matches('/')
            .split('/')
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Some(name) => Segment::Param(name.to_owned()),
                    None => Segment::Literal(segment.to_owned()),
                }
            })
            .collect();
        self.routes.push(Route {
            verb: verb.to_ascii_uppercase(),
            pattern: segments,
            endpoint,
        });
        self
    }

    /// The gateway's route table.
    pub fn standard() -> Self {
        Self::new()
            .route("GET", "/connectors", Endpoint::ListConnectors)
            .route("POST", "/connectors", Endpoint::CreateConnector)
            .route("PUT", "/connectors/{connector_id}", Endpoint::ReplaceConnector)
            .route("DELETE", "/connectors/{connector_id}", Endpoint::DeleteConnector)
            .route(
                "GET",
                "/connectors/{connector_id}/inspect",
                Endpoint::InspectConnector,
            )
            .route("POST", "/connectors/{connector_id}/query", Endpoint::QueryConnector)
            .route("POST", "/connectors/{connector_id}/chats", Endpoint::StartChat)
            .route("POST", "/chats/{chat_id}/messages", Endpoint::AddMessage)
            .route("GET", "/chats", Endpoint::ListChats)
            .route("DELETE", "/chats/{chat_id}", Endpoint::DeleteChat)
    }

    /// Find the route for `path` and `verb`.
    ///
    /// # Errors
    /// Not-found naming the path, without its leading slash, when nothing
    /// matches.
    pub fn resolve(&self, path: &str, verb: &str) -> Result<RouteMatch, Error> {
        let Some(relative) = path.strip_prefix('/') else {
            return Err(Error::not_found(path));
        };
        let components: Vec<&str> = relative.split('/').collect();
        self.routes
            .iter()
            .filter(|route| route.verb.eq_ignore_ascii_case(verb))
            .find_map(|route| bind(&route.pattern, &components).map(|bindings| RouteMatch {
                endpoint: route.endpoint,
                bindings,
            }))
            .ok_or_else(|| Error::not_found(relative))
    }
}

fn bind(pattern: &[Segment], components: &[&str]) -> Option<BTreeMap<String, String>> {
    if pattern.len() != components.len() {
        return None;
    }
    let mut bindings = BTreeMap::new();
    for (segment, component) in pattern.iter().zip(components) {
        match segment {
            Segment::Literal(literal) if literal.as_str() == *component => {}
            Segment::Param(name) if !component.is_empty() => {
                bindings.insert(name.clone(), (*component).to_owned());
            }
            _ => return None,
        }
    }
    Some(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use rstest::{fixture, rstest};

    #[fixture]
    fn router() -> Router {
        Router::standard()
    }

    #[rstest]
    #[case("/connectors", "GET", Endpoint::ListConnectors, None)]
    #[case("/connectors", "post", Endpoint::CreateConnector, None)]
    #[case("/connectors/abc", "PUT", Endpoint::ReplaceConnector, Some(("connector_id", "abc")))]
    #[case("/connectors/abc", "DELETE", Endpoint::DeleteConnector, Some(("connector_id", "abc")))]
    #[case("/connectors/abc/inspect", "GET", Endpoint::InspectConnector, Some(("connector_id", "abc")))]
    #[case("/connectors/abc/query", "POST", Endpoint::QueryConnector, Some(("connector_id", "abc")))]
    #[case("/connectors/abc/chats", "POST", Endpoint::StartChat, Some(("connector_id", "abc")))]
    #[case("/chats/xyz/messages", "POST", Endpoint::AddMessage, Some(("chat_id", "xyz")))]
    #[case("/chats", "GET", Endpoint::ListChats, None)]
    #[case("/chats/xyz", "DELETE", Endpoint::DeleteChat, Some(("chat_id", "xyz")))]
    fn standard_routes_resolve(
        router: Router,
        #[case] path: &str,
        #[case] verb: &str,
        #[case] endpoint: Endpoint,
        #[case] binding: Option<(&str, &str)>,
    ) {
        let matched = router.resolve(path, verb).expect("route exists");
        assert_eq!(matched.endpoint, endpoint);
        if let Some((name, value)) = binding {
            assert_eq!(matched.param(name).expect("bound"), value);
        } else {
            assert!(matched.bindings.is_empty());
        }
    }

    #[rstest]
    #[case("/unknown", "GET", "not found: unknown")]
    #[case("/connectors", "PATCH", "not found: connectors")]
    #[case("/connectors//inspect", "GET", "not found: connectors//inspect")]
    #[case("/connectors/abc/inspect/extra", "GET", "not found: connectors/abc/inspect/extra")]
    #[case("/", "GET", "not found: ")]
    #[case("", "GET", "not found: ")]
    fn unmatched_requests_are_not_found(
        router: Router,
        #[case] path: &str,
        #[case] verb: &str,
        #[case] message: &str,
    ) {
        let err = router.resolve(path, verb).expect_err("no route");
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.message(), message);
    }

    #[test]
    fn first_registered_route_wins() {
        let router = Router::new()
            .route("GET", "/chats/{chat_id}", Endpoint::DeleteChat)
            .route("GET", "/chats/latest", Endpoint::ListChats);
        let matched = router.resolve("/chats/latest", "GET").expect("matches");
        assert_eq!(matched.endpoint, Endpoint::DeleteChat);
    }

    #[test]
    fn only_chat_endpoints_stream() {
        assert!(Endpoint::StartChat.streams());
        assert!(Endpoint::AddMessage.streams());
        assert!(!Endpoint::QueryConnector.streams());
    }
}
