/*!
 * Path Namespace
 * Maps registered paths to the channel serving them
 */

use crate::backend::types::KernelResult;
use crate::core::types::{ChannelId, Pid};
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nix::errno::Errno;

pub(super) struct Namespace {
    paths: DashMap<String, (Pid, ChannelId), RandomState>,
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            paths: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn attach(&self, path: &str, owner: Pid, chid: ChannelId) -> KernelResult<()> {
        if path.is_empty() {
            return Err(Errno::EINVAL);
        }
        match self.paths.entry(path.to_string()) {
            Entry::Occupied(_) => Err(Errno::EEXIST),
            Entry::Vacant(slot) => {
                slot.insert((owner, chid));
                Ok(())
            }
        }
    }

    pub fn detach(&self, path: &str, owner: Pid) -> KernelResult<()> {
        match self.paths.remove_if(path, |_, (pid, _)| *pid == owner) {
            Some(_) => Ok(()),
            None if self.paths.contains_key(path) => Err(Errno::EPERM),
            None => Err(Errno::ENOENT),
        }
    }

    pub fn resolve(&self, path: &str) -> KernelResult<(Pid, ChannelId)> {
        self.paths.get(path).map(|e| *e.value()).ok_or(Errno::ENOENT)
    }

    /// Drop paths served by `owner`, or only those on channel `chid`
    pub fn remove_owner(&self, owner: Pid, chid: Option<ChannelId>) {
        self.paths
            .retain(|_, (pid, c)| !(*pid == owner && chid.map_or(true, |id| id == *c)));
    }
}
