//! Response cache middleware.
//!
//! Attach per route with `route_layer` so matched path parameters are available for
//! tag templates:
//!
//! ```ignore
//! Router::new().route(
//!     "/posts/{id}",
//!     get(show_post).route_layer(middleware::from_fn_with_state(
//!         cache.directive(["60", "post-{id}"]),
//!         response_cache_layer,
//!     )),
//! );
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, OriginalUri, RawPathParams, State},
    http::{HeaderMap, Request, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{CacheDirective, RequestIdentity, ResponseCache, RouteParam, RouteParams};

/// State of one cached route: the shared cache plus the route's directive.
#[derive(Clone)]
pub struct CacheLayerState {
    pub cache: ResponseCache,
    pub directive: Arc<CacheDirective>,
}

impl ResponseCache {
    /// Layer state for a route cached with `args` (optional TTL, then tag templates).
    pub fn directive<I, S>(&self, args: I) -> CacheLayerState
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CacheLayerState {
            cache: self.clone(),
            directive: Arc::new(CacheDirective::parse(args)),
        }
    }
}

/// Entity bindings for route parameters, set by earlier layers as a request extension.
///
/// Bound parameters take precedence over the raw path values when resolving tags.
#[derive(Debug, Clone, Default)]
pub struct RouteBindings(pub RouteParams);

/// Middleware caching GET responses of the route it is attached to.
pub async fn response_cache_layer(
    State(state): State<CacheLayerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let identity = request_identity(&mut parts).await;
    let request = Request::from_parts(parts, body);

    match state
        .cache
        .handle(&identity, &state.directive, move || next.run(request))
        .await
    {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn request_identity(parts: &mut Parts) -> RequestIdentity {
    let path_info = parts.uri.path().to_string();
    let base_path = parts
        .extensions
        .get::<OriginalUri>()
        .and_then(|original| original.path().strip_suffix(path_info.as_str()))
        .unwrap_or("")
        .to_string();

    let mut params: RouteParams = match RawPathParams::from_request_parts(parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(name, value)| (name, RouteParam::value(value)))
            .collect(),
        Err(_) => RouteParams::new(),
    };
    if let Some(RouteBindings(bound)) = parts.extensions.get::<RouteBindings>() {
        params.extend(bound.clone());
    }

    RequestIdentity {
        method: parts.method.clone(),
        base_path,
        query: parts.uri.query().unwrap_or("").to_string(),
        path_info,
        wants_json: wants_json(&parts.headers),
        params,
    }
}

/// Whether the client's most preferred media range is JSON.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let mut ranges: Vec<(f32, String)> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(parse_media_range)
        .collect();

    // Stable sort keeps declaration order among equal weights.
    ranges.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    ranges
        .first()
        .is_some_and(|(_, media)| media.contains("/json") || media.contains("+json"))
}

fn parse_media_range(item: &str) -> Option<(f32, String)> {
    let mut segments = item.split(';');
    let media = segments.next()?.trim().to_ascii_lowercase();
    if media.is_empty() {
        return None;
    }

    let quality = segments
        .filter_map(|param| param.trim().strip_prefix("q="))
        .find_map(|q| q.trim().parse::<f32>().ok())
        .unwrap_or(1.0);
    Some((quality, media))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn json_accept_header_wants_json() {
        assert!(wants_json(&accept("application/json")));
        assert!(wants_json(&accept("application/vnd.api+json")));
    }

    #[test]
    fn html_first_does_not_want_json() {
        assert!(!wants_json(&accept("text/html, application/json")));
        assert!(!wants_json(&HeaderMap::new()));
        assert!(!wants_json(&accept("*/*")));
    }

    #[test]
    fn quality_weights_pick_the_preferred_range() {
        assert!(wants_json(&accept(
            "text/html;q=0.5, application/json;q=0.9"
        )));
        assert!(!wants_json(&accept(
            "application/json;q=0.1, text/html"
        )));
    }

    #[tokio::test]
    async fn identity_uses_raw_query_and_mount_point() {
        let request = Request::builder()
            .uri("/posts/7?b=2&a=1")
            .header(header::ACCEPT, "application/json")
            .extension(OriginalUri("/blog/posts/7?b=2&a=1".parse().expect("uri")))
            .body(Body::empty())
            .expect("request");
        let (mut parts, _) = request.into_parts();

        let identity = request_identity(&mut parts).await;
        assert_eq!(identity.base_path, "/blog");
        assert_eq!(identity.path_info, "/posts/7");
        assert_eq!(identity.query, "b=2&a=1");
        assert!(identity.wants_json);
        assert!(identity.params.is_empty());
    }

    #[tokio::test]
    async fn bindings_are_part_of_identity_params() {
        let bound = RouteParams::new().with(
            "user",
            RouteParam::Entity {
                route_key: "ada".to_string(),
            },
        );
        let request = Request::builder()
            .uri("/users/1")
            .extension(RouteBindings(bound))
            .body(Body::empty())
            .expect("request");
        let (mut parts, _) = request.into_parts();

        let identity = request_identity(&mut parts).await;
        assert_eq!(
            identity.params.get("user"),
            Some(&RouteParam::Entity {
                route_key: "ada".to_string()
            })
        );
    }
}
