//! Logical path namespace of the graph store.

use std::fmt;

use crate::types::{PostId, UserId};

/// Slash-separated path into the store tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(Vec<String>);

impl StorePath {
    /// Top-level collection.
    pub fn root(collection: &str) -> Self {
        Self(vec![collection.to_string()])
    }

    /// Parse a slash-separated path, ignoring empty segments.
    pub fn parse(path: &str) -> Self {
        Self(path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect())
    }

    /// Append a segment.
    pub fn child(&self, key: impl AsRef<str>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.as_ref().to_string());
        Self(segments)
    }

    /// Path without its last segment, `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        match self.0.split_last() {
            Some((_, rest)) if !rest.is_empty() => Some(Self(rest.to_vec())),
            _ => None,
        }
    }

    /// Last segment.
    pub fn key(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// All segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether this path equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &StorePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// `posts/{postId}`
    pub fn post(post: &PostId) -> Self {
        Self::root("posts").child(post.as_str())
    }

    /// `posts/{postId}/likes`
    pub fn post_likes_counter(post: &PostId) -> Self {
        Self::post(post).child("likes")
    }

    /// `userPosts/{uid}`
    pub fn user_posts(user: &UserId) -> Self {
        Self::root("userPosts").child(user.as_str())
    }

    /// `postReplies/{postId}`
    pub fn post_replies(post: &PostId) -> Self {
        Self::root("postReplies").child(post.as_str())
    }

    /// `userReplies/{uid}`
    pub fn user_replies(user: &UserId) -> Self {
        Self::root("userReplies").child(user.as_str())
    }

    /// `userLikes/{uid}`
    pub fn user_likes(user: &UserId) -> Self {
        Self::root("userLikes").child(user.as_str())
    }

    /// `postLikes/{postId}`
    pub fn post_likes(post: &PostId) -> Self {
        Self::root("postLikes").child(post.as_str())
    }

    /// `userFollowing/{uid}`
    pub fn user_following(user: &UserId) -> Self {
        Self::root("userFollowing").child(user.as_str())
    }

    /// `userFollowers/{uid}`
    pub fn user_followers(user: &UserId) -> Self {
        Self::root("userFollowers").child(user.as_str())
    }

    /// `users`
    pub fn users() -> Self {
        Self::root("users")
    }

    /// `users/{uid}`
    pub fn user(user: &UserId) -> Self {
        Self::users().child(user.as_str())
    }

    /// `userHandles/{handle}`
    pub fn user_handle(handle: &str) -> Self {
        Self::root("userHandles").child(handle)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_paths() {
        let uid = UserId::new("u1");
        let pid = PostId::new("p1");
        assert_eq!(StorePath::user_posts(&uid).child(pid.as_str()).to_string(), "userPosts/u1/p1");
        assert_eq!(StorePath::post_likes(&pid).child(uid.as_str()).to_string(), "postLikes/p1/u1");
        assert_eq!(StorePath::post_likes_counter(&pid).to_string(), "posts/p1/likes");
    }

    #[test]
    fn test_parse_and_parent() {
        let path = StorePath::parse("/userFollowing/u1/u2/");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.key(), Some("u2"));
        assert_eq!(path.parent().unwrap().to_string(), "userFollowing/u1");
        assert!(StorePath::root("users").parent().is_none());
    }

    #[test]
    fn test_starts_with() {
        let path = StorePath::parse("userLikes/u1/p1");
        assert!(path.starts_with(&StorePath::root("userLikes")));
        assert!(!path.starts_with(&StorePath::root("postLikes")));
    }
}
