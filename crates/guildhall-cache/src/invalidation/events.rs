//! Domain events that evict cached data.

use serde_json::Value;

use crate::error::KeyError;
use crate::keys::{CacheCategory, CacheKey, KeyPattern};

/// A domain change that makes some cached data stale.
///
/// Each variant carries only the identifiers its built-in rule needs.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationEvent {
    UserUpdated { user_id: String },
    UserDeleted { user_id: String },
    ClanUpdated { clan_id: String },
    ClanDeleted { clan_id: String },
    ClanMembershipChanged { clan_id: String, user_id: String },
    FederationUpdated { federation_id: String },
    FederationMembershipChanged { federation_id: String, clan_id: String },
    MissionUpdated { mission_id: String, clan_id: Option<String> },
    StatsChanged { scope: String },
    CategoryFlush { category: CacheCategory },
    /// Application-defined event. Needs a rule registered under `name`.
    Custom { name: String, data: Value },
}

impl InvalidationEvent {
    pub fn user_updated(user_id: impl Into<String>) -> Self {
        Self::UserUpdated { user_id: user_id.into() }
    }

    pub fn clan_updated(clan_id: impl Into<String>) -> Self {
        Self::ClanUpdated { clan_id: clan_id.into() }
    }

    pub fn federation_updated(federation_id: impl Into<String>) -> Self {
        Self::FederationUpdated {
            federation_id: federation_id.into(),
        }
    }

    pub fn custom(name: impl Into<String>, data: Value) -> Self {
        Self::Custom {
            name: name.into(),
            data,
        }
    }

    /// Stable event name used to look up the rule.
    pub fn name(&self) -> &str {
        match self {
            Self::UserUpdated { .. } => "user.updated",
            Self::UserDeleted { .. } => "user.deleted",
            Self::ClanUpdated { .. } => "clan.updated",
            Self::ClanDeleted { .. } => "clan.deleted",
            Self::ClanMembershipChanged { .. } => "clan.membership_changed",
            Self::FederationUpdated { .. } => "federation.updated",
            Self::FederationMembershipChanged { .. } => "federation.membership_changed",
            Self::MissionUpdated { .. } => "mission.updated",
            Self::StatsChanged { .. } => "stats.changed",
            Self::CategoryFlush { .. } => "category.flush",
            Self::Custom { name, .. } => name.as_str(),
        }
    }

    /// Names of every event with a built-in rule.
    pub const BUILT_IN: [&'static str; 10] = [
        "user.updated",
        "user.deleted",
        "clan.updated",
        "clan.deleted",
        "clan.membership_changed",
        "federation.updated",
        "federation.membership_changed",
        "mission.updated",
        "stats.changed",
        "category.flush",
    ];
}

/// Keys and patterns the built-in rules evict for `event`.
///
/// `Custom` events produce nothing here; they rely on an explicitly
/// registered rule.
pub fn default_keys(event: &InvalidationEvent) -> Result<Vec<String>, KeyError> {
    use InvalidationEvent::*;

    let keys = match event {
        UserUpdated { user_id } => vec![
            CacheKey::user(user_id)?.to_string(),
            CacheKey::user(user_id)?.with_suffix("profile").to_string(),
            KeyPattern::routes(&CacheKey::user(user_id)?),
            KeyPattern::new(CacheCategory::User, "list*"),
        ],
        // Presence lives under the user key too and goes with it
        UserDeleted { user_id } => vec![
            CacheKey::user(user_id)?.to_string(),
            CacheKey::user(user_id)?.with_suffix("*").to_string(),
            KeyPattern::new(CacheCategory::User, "list*"),
        ],
        ClanUpdated { clan_id } => vec![
            CacheKey::clan(clan_id)?.to_string(),
            CacheKey::clan(clan_id)?.with_suffix("members").to_string(),
            KeyPattern::routes(&CacheKey::clan(clan_id)?),
            KeyPattern::new(CacheCategory::Clan, "list*"),
        ],
        ClanDeleted { clan_id } => vec![
            CacheKey::clan(clan_id)?.to_string(),
            CacheKey::clan(clan_id)?.with_suffix("*").to_string(),
            KeyPattern::new(CacheCategory::Clan, "list*"),
        ],
        ClanMembershipChanged { clan_id, user_id } => vec![
            CacheKey::clan(clan_id)?.to_string(),
            CacheKey::clan(clan_id)?.with_suffix("members").to_string(),
            KeyPattern::routes(&CacheKey::clan(clan_id)?),
            CacheKey::user(user_id)?.with_suffix("clans").to_string(),
        ],
        FederationUpdated { federation_id } => vec![
            CacheKey::federation(federation_id)?.to_string(),
            CacheKey::federation(federation_id)?.with_suffix("clans").to_string(),
            KeyPattern::routes(&CacheKey::federation(federation_id)?),
            KeyPattern::new(CacheCategory::Federation, "list*"),
        ],
        FederationMembershipChanged { federation_id, clan_id } => vec![
            CacheKey::federation(federation_id)?.to_string(),
            CacheKey::federation(federation_id)?.with_suffix("clans").to_string(),
            KeyPattern::routes(&CacheKey::federation(federation_id)?),
            CacheKey::clan(clan_id)?.to_string(),
        ],
        MissionUpdated { mission_id, clan_id } => {
            let mut keys = vec![
                CacheKey::mission(mission_id)?.to_string(),
                KeyPattern::routes(&CacheKey::mission(mission_id)?),
                KeyPattern::new(CacheCategory::Mission, "list*"),
            ];
            if let Some(clan_id) = clan_id {
                keys.push(CacheKey::clan(clan_id)?.with_suffix("missions").to_string());
            }
            keys
        }
        StatsChanged { scope } => vec![
            CacheKey::stats(scope)?.to_string(),
            CacheKey::stats(scope)?.with_suffix("*").to_string(),
        ],
        CategoryFlush { category } => vec![KeyPattern::category(*category)],
        Custom { .. } => Vec::new(),
    };
    Ok(keys)
}
