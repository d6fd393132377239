//! Identity resolver
//!
//! Normalizes a connecting participant into a uniform [`VoterIdentity`].
//! Authentication itself happens upstream; what arrives here is either a
//! member credential already vetted by that layer, or a guest join form,
//! or a previously minted guest token.

use serde::{Deserialize, Serialize};
use slothboard_common::model::{Avatar, Role};
use slothboard_common::{Error, Result, VoterIdentity};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db;

/// Vetted member credential forwarded by the auth layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberCredential {
    pub member_id: Uuid,
    pub role: Role,
    pub display_name: String,
}

impl From<MemberCredential> for VoterIdentity {
    fn from(cred: MemberCredential) -> Self {
        VoterIdentity::Member {
            member_id: cred.member_id,
            role: cred.role,
            display_name: cred.display_name,
        }
    }
}

/// Join form submitted through a share link with no credential
#[derive(Debug, Clone, Deserialize)]
pub struct JoinForm {
    pub display_name: String,
    #[serde(default)]
    pub avatar: Avatar,
}

/// How a request refers to its voter: a member credential or a guest
/// token minted by an earlier join
#[derive(Debug, Clone, Deserialize)]
pub struct VoterRef {
    pub member: Option<MemberCredential>,
    pub guest_id: Option<Uuid>,
}

/// Resolve a joining participant into an identity
///
/// Members resolve to the same stable identity across sessions. A join
/// form always mints a brand-new guest scoped to `session_id`; guests are
/// never reused across sessions, even with the same display name.
pub async fn resolve_join(
    pool: &Pool<Sqlite>,
    session_id: Uuid,
    credential: Option<MemberCredential>,
    join: Option<JoinForm>,
) -> Result<VoterIdentity> {
    if let Some(cred) = credential {
        return Ok(cred.into());
    }

    if let Some(form) = join {
        let name = form.display_name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("display name must not be empty".into()));
        }
        let guest = db::guests::create(pool, session_id, name, form.avatar).await?;
        return Ok(VoterIdentity::Guest {
            guest_id: guest.id,
            display_name: guest.display_name,
            avatar: guest.avatar,
        });
    }

    Err(Error::IdentityRequired)
}

/// Resolve a voter reference for an in-session operation (cast, reveal)
///
/// Guest tokens are looked up within the target session only, so a guest
/// cannot vote in a session it did not join.
pub async fn resolve_ref(
    pool: &Pool<Sqlite>,
    session_id: Uuid,
    voter: VoterRef,
) -> Result<VoterIdentity> {
    if let Some(cred) = voter.member {
        return Ok(cred.into());
    }

    if let Some(guest_id) = voter.guest_id {
        let guest = db::guests::get_in_session(pool, session_id, guest_id)
            .await?
            .ok_or(Error::IdentityRequired)?;
        return Ok(VoterIdentity::Guest {
            guest_id: guest.id,
            display_name: guest.display_name,
            avatar: guest.avatar,
        });
    }

    Err(Error::IdentityRequired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_member_credential_resolves_without_db_rows() {
        let pool = db::connect_in_memory().await.unwrap();
        let cred = MemberCredential {
            member_id: Uuid::new_v4(),
            role: Role::Developer,
            display_name: "Ana".into(),
        };

        let identity = resolve_join(&pool, Uuid::new_v4(), Some(cred.clone()), None)
            .await
            .unwrap();
        assert!(identity.is_member());
        assert_eq!(identity.display_name(), "Ana");
    }

    #[tokio::test]
    async fn test_join_form_mints_fresh_guest_per_session() {
        let pool = db::connect_in_memory().await.unwrap();
        let form = JoinForm {
            display_name: "Luis".into(),
            avatar: Avatar::Happy,
        };

        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let a = resolve_join(&pool, session_a, None, Some(form.clone()))
            .await
            .unwrap();
        let b = resolve_join(&pool, session_b, None, Some(form))
            .await
            .unwrap();

        // Same name, distinct identities
        assert_ne!(a.voter_key(), b.voter_key());
    }

    #[tokio::test]
    async fn test_no_credential_no_form_is_identity_required() {
        let pool = db::connect_in_memory().await.unwrap();
        let err = resolve_join(&pool, Uuid::new_v4(), None, None).await.unwrap_err();
        assert!(matches!(err, Error::IdentityRequired));
    }

    #[tokio::test]
    async fn test_guest_token_is_session_scoped() {
        let pool = db::connect_in_memory().await.unwrap();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();

        let identity = resolve_join(
            &pool,
            session_a,
            None,
            Some(JoinForm {
                display_name: "G".into(),
                avatar: Avatar::Default,
            }),
        )
        .await
        .unwrap();

        let guest_id = match identity {
            VoterIdentity::Guest { guest_id, .. } => guest_id,
            VoterIdentity::Member { .. } => panic!("expected guest"),
        };

        // Valid in its own session
        let ok = resolve_ref(
            &pool,
            session_a,
            VoterRef {
                member: None,
                guest_id: Some(guest_id),
            },
        )
        .await;
        assert!(ok.is_ok());

        // Rejected in a different session
        let err = resolve_ref(
            &pool,
            session_b,
            VoterRef {
                member: None,
                guest_id: Some(guest_id),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::IdentityRequired));
    }
}
