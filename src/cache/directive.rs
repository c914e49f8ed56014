//! Per-route caching directive.
//!
//! A route opts into caching with a list of string arguments: an optional leading TTL
//! in seconds followed by tag-name templates such as `post-{id}`. Templates are resolved
//! against the matched route parameters at request time.

use std::collections::HashMap;
use std::time::Duration;

/// Value bound to a route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteParam {
    /// Raw path segment value.
    Value(String),
    /// Entity bound to the parameter, represented by its route key.
    Entity { route_key: String },
}

impl RouteParam {
    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    pub fn entity<E: RouteKey + ?Sized>(entity: &E) -> Self {
        Self::Entity {
            route_key: entity.route_key(),
        }
    }

    /// Text substituted for a `{name}` placeholder.
    pub fn as_tag_fragment(&self) -> &str {
        match self {
            RouteParam::Value(value) => value,
            RouteParam::Entity { route_key } => route_key,
        }
    }
}

/// Entities that can stand in for a route parameter.
pub trait RouteKey {
    /// Natural external identifier used in URLs (an id or slug).
    fn route_key(&self) -> String;
}

/// Route parameters of the matched request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    params: HashMap<String, RouteParam>,
}

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: RouteParam) {
        self.params.insert(name.into(), param);
    }

    pub fn with(mut self, name: impl Into<String>, param: RouteParam) -> Self {
        self.insert(name, param);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RouteParam> {
        self.params.get(name)
    }

    /// Overlay `other` on top of these parameters.
    pub fn extend(&mut self, other: RouteParams) {
        self.params.extend(other.params);
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, RouteParam)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, RouteParam)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(name, param)| (name.into(), param))
                .collect(),
        }
    }
}

/// Parsed caching arguments of a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirective {
    ttl: Option<Duration>,
    tags: Vec<String>,
}

impl CacheDirective {
    /// Parse directive arguments.
    ///
    /// A numeric first argument is the TTL in seconds; every other argument is a tag
    /// template. Without a TTL, entries stay until invalidated. Empty templates are
    /// dropped.
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter().peekable();
        let ttl = args
            .peek()
            .and_then(|first| parse_ttl_seconds(first.as_ref()))
            .map(Duration::from_secs);
        if ttl.is_some() {
            args.next();
        }

        let tags = args
            .map(|arg| arg.as_ref().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Self { ttl, tags }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Tag templates, in declaration order.
    pub fn tag_templates(&self) -> &[String] {
        &self.tags
    }

    /// Resolve tag templates against `params`, dropping tags that resolve to nothing.
    pub fn resolve_tags(&self, params: &RouteParams) -> Vec<String> {
        self.tags
            .iter()
            .map(|template| resolve_template(template, params))
            .filter(|tag| !tag.is_empty())
            .collect()
    }
}

/// Seconds in a numeric argument; fractions are truncated and negatives clamp to zero.
fn parse_ttl_seconds(arg: &str) -> Option<u64> {
    let arg = arg.trim();
    if let Ok(seconds) = arg.parse::<u64>() {
        return Some(seconds);
    }

    let seconds = arg.parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(seconds.max(0.0).trunc() as u64)
}

/// Substitute every `{name}` placeholder with the matching parameter.
///
/// A placeholder without a matching parameter is kept verbatim, as is an unclosed `{`.
pub fn resolve_template(template: &str, params: &RouteParams) -> String {
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        let close = open + len;
        let placeholder = &rest[open..=close];
        let name = rest[open + 1..close].trim();

        resolved.push_str(&rest[..open]);
        match params.get(name) {
            Some(param) => resolved.push_str(param.as_tag_fragment()),
            None => resolved.push_str(placeholder),
        }
        rest = &rest[close + 1..];
    }

    resolved.push_str(rest);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    struct User {
        slug: &'static str,
    }

    impl RouteKey for User {
        fn route_key(&self) -> String {
            self.slug.to_string()
        }
    }

    #[test]
    fn numeric_first_argument_is_ttl() {
        let directive = CacheDirective::parse(["60", "post-{id}", "posts"]);
        assert_eq!(directive.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(directive.tag_templates(), ["post-{id}", "posts"]);
    }

    #[test]
    fn without_numeric_first_argument_everything_is_a_tag() {
        let directive = CacheDirective::parse(["posts", "60"]);
        assert_eq!(directive.ttl(), None);
        assert_eq!(directive.tag_templates(), ["posts", "60"]);
    }

    #[test]
    fn no_arguments_means_permanent_and_untagged() {
        let directive = CacheDirective::parse(Vec::<String>::new());
        assert_eq!(directive, CacheDirective::default());
    }

    #[test]
    fn fractional_and_negative_ttls_are_normalised() {
        assert_eq!(
            CacheDirective::parse(["1.9"]).ttl(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            CacheDirective::parse(["-5", "a"]).ttl(),
            Some(Duration::ZERO)
        );
        assert_eq!(CacheDirective::parse(["inf"]).ttl(), None);
    }

    #[test]
    fn only_empty_templates_are_dropped() {
        let directive = CacheDirective::parse(["30", "", "  ", "posts"]);
        assert_eq!(directive.tag_templates(), ["  ", "posts"]);
    }

    #[test]
    fn oversized_ttls_saturate() {
        assert_eq!(
            CacheDirective::parse(["18446744073709551615", "t"]).ttl(),
            Some(Duration::from_secs(u64::MAX))
        );
        assert_eq!(
            CacheDirective::parse(["1e30", "t"]).ttl(),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn placeholder_resolves_to_route_value() {
        let params = RouteParams::new().with("id", RouteParam::value("42"));
        assert_eq!(resolve_template("user-{id}", &params), "user-42");
    }

    #[test]
    fn placeholder_tolerates_inner_whitespace() {
        let params = RouteParams::new().with("id", RouteParam::value("42"));
        assert_eq!(resolve_template("user-{ id }", &params), "user-42");
    }

    #[test]
    fn unresolved_placeholder_is_kept_verbatim() {
        let params = RouteParams::new();
        assert_eq!(resolve_template("user-{id}", &params), "user-{id}");
        assert_eq!(resolve_template("broken-{id", &params), "broken-{id");
    }

    #[test]
    fn entity_parameter_contributes_route_key() {
        let params = RouteParams::new().with("user", RouteParam::entity(&User { slug: "ada" }));
        assert_eq!(resolve_template("profile-{user}", &params), "profile-ada");
    }

    #[test]
    fn multiple_placeholders_resolve_in_one_tag() {
        let params: RouteParams = [
            ("post", RouteParam::value("7")),
            ("comment", RouteParam::value("3")),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            resolve_template("post-{post}-comment-{comment}", &params),
            "post-7-comment-3"
        );
    }

    #[test]
    fn tags_resolving_to_nothing_are_dropped() {
        let directive = CacheDirective::parse(["{slug}", "posts"]);
        let params = RouteParams::new().with("slug", RouteParam::value(""));
        assert_eq!(directive.resolve_tags(&params), vec!["posts".to_string()]);
    }

    #[test]
    fn whitespace_tags_are_kept() {
        let directive = CacheDirective::parse(["{slug}"]);
        let params = RouteParams::new().with("slug", RouteParam::value(" "));
        assert_eq!(directive.resolve_tags(&params), vec![" ".to_string()]);
    }
}
