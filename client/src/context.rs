use std::sync::Arc;

use chatty_common::protocol::{Query, QueryResult};
use chatty_common::{CacheUpdate, GroupData, GroupId, UserData, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::shared_cache::SharedCache;
use crate::store::Store;
use crate::transport::{DataLayer, ReconnectSource};

/// Everything a screen needs, handed down explicitly.
#[derive(Clone)]
pub struct ClientContext {
    pub config: ClientConfig,
    pub data: Arc<dyn DataLayer>,
    pub reconnect: Arc<dyn ReconnectSource>,
    pub cache: SharedCache,
    pub store: Store,
}

impl ClientContext {
    pub fn new(config: ClientConfig, data: Arc<dyn DataLayer>, reconnect: Arc<dyn ReconnectSource>) -> Self {
        ClientContext { config, data, reconnect, cache: SharedCache::new(), store: Store::default() }
    }

    /// Run the user query and store the result.
    pub async fn fetch_user(&self, id: UserId) -> Result<Option<UserData>, ClientError> {
        match self.data.query(Query::User { id }).await? {
            QueryResult::User(Some(user)) => {
                self.cache.apply(CacheUpdate::WriteUser(user.clone()));
                Ok(Some(user))
            }
            QueryResult::User(None) => Ok(None),
            QueryResult::Group(_) => Err(ClientError::UnexpectedResponse("user")),
        }
    }

    /// Run the group query for one page.
    pub async fn fetch_group_page(&self, group_id: GroupId, offset: usize) -> Result<GroupData, ClientError> {
        let query = Query::Group { group_id, offset, limit: self.config.page_size };
        match self.data.query(query).await? {
            QueryResult::Group(Some(group)) => Ok(group),
            QueryResult::Group(None) => Err(ClientError::NotFound("group", group_id.0)),
            QueryResult::User(_) => Err(ClientError::UnexpectedResponse("group")),
        }
    }
}
