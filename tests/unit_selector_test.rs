use topicwire::MessagingError;
use topicwire::core::topics::TopicSelector;

fn selector(expression: &str) -> TopicSelector {
    TopicSelector::parse(expression).unwrap()
}

#[tokio::test]
async fn test_plain_path_matches_exactly() {
    let s = selector("random/Int64");
    assert!(s.matches("random/Int64"));
    assert!(!s.matches("random/Int64/child"));
    assert!(!s.matches("random"));
    assert!(!s.matches("random/Int"));
}

#[tokio::test]
async fn test_path_prefix_is_optional() {
    assert!(selector(">random/Int64").matches("random/Int64"));
    assert_eq!(selector(">a/b").expression(), ">a/b");
}

#[tokio::test]
async fn test_double_slash_selects_path_and_descendants() {
    let s = selector(">foo//");
    assert!(s.matches("foo"));
    assert!(s.matches("foo/bar"));
    assert!(s.matches("foo/bar/baz"));
    assert!(!s.matches("foobar"));
}

#[tokio::test]
async fn test_single_slash_selects_descendants_only() {
    let s = selector(">foo/");
    assert!(!s.matches("foo"));
    assert!(s.matches("foo/bar"));
    assert!(!s.matches("foobar/x"));
}

#[tokio::test]
async fn test_split_path_matches_each_segment() {
    let s = selector("?sensors/temp-[0-9]+");
    assert!(s.matches("sensors/temp-1"));
    assert!(s.matches("sensors/temp-42"));
    assert!(!s.matches("sensors/temp-x"));
    assert!(!s.matches("sensors/temp-1/raw"));
    assert!(!s.matches("sensors"));
}

#[tokio::test]
async fn test_split_path_with_descendants() {
    let s = selector("?sensors/.*//");
    assert!(s.matches("sensors/a"));
    assert!(s.matches("sensors/a/b/c"));
    assert!(!s.matches("other/a"));
}

#[tokio::test]
async fn test_full_path_regex_must_match_whole_path() {
    let s = selector("*a/.*/z");
    assert!(s.matches("a/b/z"));
    assert!(s.matches("a/b/c/z"));
    assert!(!s.matches("xa/b/z"));
    assert!(!s.matches("a/b/z/1"));
}

#[tokio::test]
async fn test_selector_set_matches_any_member() {
    let s = selector("#>a////?b/[0-9]");
    assert!(s.matches("a"));
    assert!(s.matches("b/7"));
    assert!(!s.matches("c"));
}

#[tokio::test]
async fn test_invalid_selectors_are_rejected() {
    for expression in ["", "   ", "*", "?", "#", "*(unclosed", "?a/[z-a]", "a\u{7}b"] {
        let err = TopicSelector::parse(expression).unwrap_err();
        assert!(
            matches!(err, MessagingError::InvalidSelector(_)),
            "'{}' should be rejected, got {:?}",
            expression.escape_debug(),
            err
        );
    }
}

#[tokio::test]
async fn test_selector_equality_is_by_expression() {
    assert_eq!(selector("a/b"), selector("a/b"));
    assert_ne!(selector("a/b"), selector(">a/b"));
    assert_eq!("x//".parse::<TopicSelector>().unwrap().to_string(), "x//");
}
