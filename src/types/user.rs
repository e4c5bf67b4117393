//! User types.

use serde::{Deserialize, Serialize};

use super::ids::UserId;

/// Follower and following counts for a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationStats {
    /// Number of users following this user.
    pub followers: usize,
    /// Number of users this user follows.
    pub following: usize,
}

/// Stored shape of `users/{uid}`.
///
/// `username` is the unique handle and is required; everything else is
/// optional profile data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique handle.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub fullname: String,
    /// Contact email.
    #[serde(default)]
    pub email: String,
    /// Free-form bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Avatar reference in object storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl UserRecord {
    /// Create a record with just a handle and display name.
    pub fn new(username: impl Into<String>, fullname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            fullname: fullname.into(),
            email: String::new(),
            bio: None,
            profile_image_url: None,
        }
    }
}

/// Hydrated user.
///
/// `is_followed` and `is_current_user` are relative to whoever resolved the
/// user and are never written back to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Immutable identity.
    pub id: UserId,
    /// Display name.
    pub display_name: String,
    /// Unique handle.
    pub handle: String,
    /// Contact email.
    pub email: String,
    /// Bio, empty when unset.
    pub bio: Option<String>,
    /// Avatar reference.
    pub avatar: Option<String>,
    /// Whether the viewer follows this user.
    pub is_followed: bool,
    /// Whether this user is the viewer.
    pub is_current_user: bool,
    /// Relation counters, when fetched.
    pub stats: Option<RelationStats>,
}

impl User {
    /// Build a user from its stored record, relative to a viewer.
    pub fn from_record(id: UserId, record: UserRecord, viewer: Option<&UserId>) -> Self {
        let is_current_user = viewer == Some(&id);
        Self {
            id,
            display_name: record.fullname,
            handle: record.username,
            email: record.email,
            bio: record.bio,
            avatar: record.profile_image_url,
            is_followed: false,
            is_current_user,
            stats: None,
        }
    }

    /// Convert back into the stored shape, dropping viewer-relative fields.
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            username: self.handle.clone(),
            fullname: self.display_name.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            profile_image_url: self.avatar.clone(),
        }
    }
}
