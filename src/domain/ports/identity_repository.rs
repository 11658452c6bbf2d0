//! Identity persistence port (spec §3, §4.9).

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{GlobalIdentity, SessionIdentity};

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn load_global(&self) -> DomainResult<GlobalIdentity>;

    async fn save_global(&self, identity: &GlobalIdentity) -> DomainResult<()>;

    async fn save_session(&self, session: &SessionIdentity) -> DomainResult<()>;
}
