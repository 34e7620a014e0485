//! Session bookkeeping for one request.
//!
//! Session storage is external; the request only tracks which sessions it entered
//! (possibly from several managers across nested dispatches), the current session,
//! and the manager that can create a new one.

use crate::error::{RequestError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A session handed out by a [`SessionManager`]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    fn is_valid(&self) -> bool;

    /// Name of the manager that owns this session
    fn manager_name(&self) -> &str;
}

/// External session store
pub trait SessionManager: Send + Sync {
    fn name(&self) -> &str;

    fn new_session(&self) -> Result<Arc<dyn Session>>;

    fn is_valid(&self, session: &dyn Session) -> bool {
        session.is_valid()
    }

    /// The request that used `session` has completed
    fn complete(&self, session: &dyn Session);

    /// The response is about to be committed; persist `session` state
    fn commit(&self, session: &dyn Session);

    /// Give `session` a fresh id and return it
    fn renew_id(&self, _session: &dyn Session) -> Result<String> {
        Err(RequestError::illegal_state(format!(
            "session manager '{}' cannot renew session ids",
            self.name()
        )))
    }
}

struct SessionEntry {
    session: Arc<dyn Session>,
    manager: Arc<dyn SessionManager>,
}

/// Sessions touched by the current request
#[derive(Default)]
pub struct SessionScope {
    entered: Vec<SessionEntry>,
    current: Option<Arc<dyn Session>>,
    manager: Option<Arc<dyn SessionManager>>,
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("entered", &self.entered.len())
            .field("current", &self.current.as_ref().map(|s| s.id().to_string()))
            .field("manager", &self.manager.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

impl SessionScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the request entered `session`. Entering the same session twice is
    /// a no-op.
    pub fn enter(&mut self, session: Arc<dyn Session>, manager: Arc<dyn SessionManager>) {
        if self
            .entered
            .iter()
            .any(|e| Arc::ptr_eq(&e.session, &session))
        {
            return;
        }
        self.entered.push(SessionEntry { session, manager });
    }

    /// Number of distinct sessions entered
    #[must_use]
    pub fn entered_count(&self) -> usize {
        self.entered.len()
    }

    pub fn set_manager(&mut self, manager: Option<Arc<dyn SessionManager>>) {
        self.manager = manager;
    }

    #[must_use]
    pub fn manager(&self) -> Option<&Arc<dyn SessionManager>> {
        self.manager.as_ref()
    }

    pub fn set_current(&mut self, session: Option<Arc<dyn Session>>) {
        self.current = session;
    }

    #[must_use]
    pub fn current(&self) -> Option<&Arc<dyn Session>> {
        self.current.as_ref()
    }

    /// The valid current session, creating one if `create` is set.
    ///
    /// Creation fails once the response is committed or when no manager is set.
    pub fn get_or_create(
        &mut self,
        create: bool,
        response_committed: bool,
    ) -> Result<Option<Arc<dyn Session>>> {
        if let Some(current) = &self.current {
            let valid = match &self.manager {
                Some(manager) if manager.name() == current.manager_name() => {
                    manager.is_valid(current.as_ref())
                }
                _ => current.is_valid(),
            };
            if valid {
                return Ok(Some(Arc::clone(current)));
            }
            self.current = None;
        }

        if !create {
            return Ok(None);
        }
        if response_committed {
            return Err(RequestError::illegal_state("Response is committed"));
        }
        let manager = self
            .manager
            .clone()
            .ok_or_else(|| RequestError::illegal_state("No session manager"))?;
        let session = manager.new_session()?;
        debug!(session_id = %session.id(), manager = %manager.name(), "session created");
        self.enter(Arc::clone(&session), manager);
        self.current = Some(Arc::clone(&session));
        Ok(Some(session))
    }

    /// The entered session that belongs to the manager called `manager_name`
    #[must_use]
    pub fn session_for(&self, manager_name: &str) -> Option<Arc<dyn Session>> {
        self.entered
            .iter()
            .find(|e| e.manager.name() == manager_name)
            .map(|e| Arc::clone(&e.session))
    }

    /// Renew the id of `session` through the manager that handed it out
    pub fn renew_id(&self, session: &Arc<dyn Session>) -> Result<String> {
        let manager = self
            .entered
            .iter()
            .find(|e| Arc::ptr_eq(&e.session, session))
            .map(|e| &e.manager)
            .or(self.manager.as_ref())
            .ok_or_else(|| RequestError::illegal_state("No session manager"))?;
        let old_id = session.id().to_string();
        let new_id = manager.renew_id(session.as_ref())?;
        debug!(old_id = %old_id, new_id = %new_id, manager = %manager.name(), "session id renewed");
        Ok(new_id)
    }

    /// Let every manager persist the sessions this request entered
    pub fn commit_all(&self) {
        for entry in &self.entered {
            entry.manager.commit(entry.session.as_ref());
        }
    }

    /// Tell every manager the request is done with its sessions
    pub fn complete_all(&mut self) {
        for entry in self.entered.drain(..) {
            entry.manager.complete(entry.session.as_ref());
        }
    }

    pub fn recycle(&mut self) {
        self.entered.clear();
        self.current = None;
        self.manager = None;
    }
}
