//! Registration and lookup of dialogs by id.

use super::context::DialogContext;
use super::error::DialogError;
use super::telemetry::DialogTelemetry;
use super::{Dialog, DialogState};
use crate::turn::TurnContext;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

/// A named collection of dialogs that can begin and continue each other.
///
/// Registration order is remembered so the set's [`version`] digest is
/// stable across runs of the same registration sequence.
///
/// [`version`]: DialogSet::version
#[derive(Default)]
pub struct DialogSet {
    dialogs: HashMap<String, Arc<dyn Dialog>>,
    order: Vec<String>,
    // Interior-mutable so containers can push a client into child sets they
    // only hold shared.
    telemetry: Mutex<Option<Arc<dyn DialogTelemetry>>>,
}

impl DialogSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dialog. Ids must be non-empty and unique within the set.
    pub fn add(&mut self, dialog: impl Dialog + 'static) -> Result<&mut Self, DialogError> {
        self.add_arc(Arc::new(dialog))
    }

    /// Registers an already-shared dialog.
    pub fn add_arc(&mut self, dialog: Arc<dyn Dialog>) -> Result<&mut Self, DialogError> {
        let id = dialog.id().to_string();
        if id.is_empty() {
            return Err(DialogError::EmptyDialogId);
        }
        if self.dialogs.contains_key(&id) {
            return Err(DialogError::DuplicateId(id));
        }
        if let Some(client) = self.telemetry() {
            let mut visited = HashSet::new();
            dialog.propagate_telemetry(&client, &mut visited);
        }
        self.order.push(id.clone());
        self.dialogs.insert(id, dialog);
        Ok(self)
    }

    /// Looks up a dialog by id.
    pub fn find(&self, dialog_id: &str) -> Option<Arc<dyn Dialog>> {
        self.dialogs.get(dialog_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates dialogs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Dialog>> {
        self.order.iter().filter_map(|id| self.dialogs.get(id))
    }

    /// The telemetry client shared with dialogs in this set, if any.
    pub fn telemetry(&self) -> Option<Arc<dyn DialogTelemetry>> {
        match self.telemetry.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Installs a telemetry client and propagates it to every registered
    /// dialog, recursing through containers.
    pub fn set_telemetry(&self, client: Arc<dyn DialogTelemetry>) {
        let mut visited = HashSet::new();
        self.set_telemetry_guarded(client, &mut visited);
    }

    /// Propagation entry point that carries the caller's visited set, so
    /// container graphs that share children install the client exactly once
    /// per dialog id.
    pub(crate) fn set_telemetry_guarded(
        &self,
        client: Arc<dyn DialogTelemetry>,
        visited: &mut HashSet<String>,
    ) {
        for dialog in self.iter() {
            dialog.propagate_telemetry(&client, visited);
        }
        let mut slot = match self.telemetry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(client);
    }

    /// A digest over the versions of every registered dialog, in
    /// registration order. Changes whenever any dialog's definition does.
    pub fn version(&self) -> String {
        let mut hasher = Sha256::new();
        for dialog in self.iter() {
            hasher.update(dialog.version().as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            // write! into a String cannot fail
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    /// Builds a [`DialogContext`] over this set for the current turn.
    pub fn create_context<'a>(
        &'a self,
        ctx: &'a TurnContext,
        state: &'a mut DialogState,
    ) -> DialogContext<'a> {
        DialogContext::new(self, ctx, state)
    }
}

impl std::fmt::Debug for DialogSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogSet")
            .field("dialogs", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogs::{DialogTurnResult, WaterfallDialog};

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut set = DialogSet::new();
        set.add(WaterfallDialog::new("greet")).unwrap();
        let err = set.add(WaterfallDialog::new("greet")).unwrap_err();
        assert!(matches!(err, DialogError::DuplicateId(id) if id == "greet"));
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let mut set = DialogSet::new();
        let err = set.add(WaterfallDialog::new("")).unwrap_err();
        assert!(matches!(err, DialogError::EmptyDialogId));
    }

    #[test]
    fn test_find_returns_registered_dialog() {
        let mut set = DialogSet::new();
        set.add(WaterfallDialog::new("greet")).unwrap();
        assert!(set.find("greet").is_some());
        assert!(set.find("other").is_none());
    }

    #[test]
    fn test_version_changes_with_registration() {
        let mut a = DialogSet::new();
        a.add(WaterfallDialog::new("greet")).unwrap();
        let before = a.version();

        a.add(WaterfallDialog::new("survey")).unwrap();
        assert_ne!(before, a.version(), "adding a dialog changes the digest");
    }

    #[test]
    fn test_version_is_stable_for_same_registration() {
        let build = || {
            let mut set = DialogSet::new();
            set.add(WaterfallDialog::new("greet")).unwrap();
            set.add(WaterfallDialog::new("survey")).unwrap();
            set.version()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_version_reflects_step_count() {
        fn noop<'a>(
            _dc: &'a mut DialogContext<'_>,
            _step: crate::dialogs::WaterfallStepInfo,
        ) -> futures::future::BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
            Box::pin(async move { Ok(DialogTurnResult::waiting()) })
        }

        let mut a = DialogSet::new();
        a.add(WaterfallDialog::new("greet")).unwrap();

        let mut b = DialogSet::new();
        let mut dialog = WaterfallDialog::new("greet");
        dialog.add_step(noop);
        b.add(dialog).unwrap();

        assert_ne!(a.version(), b.version());
    }
}
