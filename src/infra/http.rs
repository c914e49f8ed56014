//! HTTP routes of the demo server.
//!
//! Post and user pages are cached through the response cache layer; `/tags/{tag}`
//! exposes tag group membership for invalidation tooling.

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use crate::cache::{
    CacheError, ResponseCache, RouteBindings, RouteKey, RouteParam, RouteParams,
    response_cache_layer,
};

/// User record the demo binds to the `{user}` route parameter.
#[derive(Debug, Clone, Copy)]
pub struct DemoUser {
    pub id: u64,
    pub handle: &'static str,
    pub name: &'static str,
}

impl RouteKey for DemoUser {
    fn route_key(&self) -> String {
        self.handle.to_string()
    }
}

const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        id: 1,
        handle: "ada",
        name: "Ada Lovelace",
    },
    DemoUser {
        id: 2,
        handle: "grace",
        name: "Grace Hopper",
    },
];

fn find_user(id: &str) -> Option<&'static DemoUser> {
    let id: u64 = id.parse().ok()?;
    DEMO_USERS.iter().find(|user| user.id == id)
}

/// Build the demo router around `cache`.
pub fn build_router(cache: ResponseCache) -> Router {
    let list_cache = cache.directive(["posts"]);
    let post_cache = cache.directive(["60", "post-{id}", "posts"]);
    let user_cache = cache.directive(["300", "user-{user}"]);

    Router::new()
        .route(
            "/posts",
            get(list_posts).route_layer(middleware::from_fn_with_state(
                list_cache,
                response_cache_layer,
            )),
        )
        .route(
            "/posts/{id}",
            get(show_post)
                .post(update_post)
                .route_layer(middleware::from_fn_with_state(
                    post_cache,
                    response_cache_layer,
                )),
        )
        .route(
            "/users/{user}",
            get(show_user)
                .route_layer(middleware::from_fn_with_state(
                    user_cache,
                    response_cache_layer,
                ))
                .route_layer(middleware::from_fn(bind_user)),
        )
        .route("/tags/{tag}", get(tag_members))
        .with_state(cache)
}

/// Bind `{user}` to the matching user so tags use the handle instead of the id.
async fn bind_user(Path(user): Path<String>, mut request: Request, next: Next) -> Response {
    if let Some(found) = find_user(&user) {
        let bindings = RouteParams::new().with("user", RouteParam::entity(found));
        request.extensions_mut().insert(RouteBindings(bindings));
    }
    next.run(request).await
}

async fn list_posts() -> String {
    "posts: 1, 2, 3".to_string()
}

async fn show_post(Path(id): Path<u64>) -> String {
    format!("post {id}")
}

async fn update_post(Path(id): Path<u64>) -> (StatusCode, String) {
    (StatusCode::ACCEPTED, format!("post {id} updated"))
}

async fn show_user(Path(user): Path<String>) -> Response {
    match find_user(&user) {
        Some(found) => format!("{} (@{})", found.name, found.handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct TagMemberView {
    key: String,
    expires_in_secs: Option<u64>,
}

async fn tag_members(
    State(cache): State<ResponseCache>,
    Path(tag): Path<String>,
) -> Result<Json<Vec<TagMemberView>>, CacheError> {
    let members = cache.tags().members(&tag).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|member| TagMemberView {
                key: member.key,
                expires_in_secs: member.expires_in.map(|left| left.as_secs()),
            })
            .collect(),
    ))
}
