use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies one scripting environment that attaches objects to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId(pub u64);

/// Opaque object owned by a scripting environment.
pub type ScriptObject = Arc<dyn Any + Send + Sync>;

/// Environment → object association table carried by feeds, entries and content.
///
/// The engine never looks inside the objects; it only stores them so that a
/// scripting bridge can find the wrapper it created for a model object.
#[derive(Clone, Default)]
pub struct ScriptBindings {
    objects: HashMap<EnvironmentId, ScriptObject>,
}

impl ScriptBindings {
    /// Associates `object` with `env`, returning the previous association.
    pub fn add(&mut self, env: EnvironmentId, object: ScriptObject) -> Option<ScriptObject> {
        self.objects.insert(env, object)
    }

    pub fn remove(&mut self, env: EnvironmentId) -> Option<ScriptObject> {
        self.objects.remove(&env)
    }

    pub fn lookup(&self, env: EnvironmentId) -> Option<&ScriptObject> {
        self.objects.get(&env)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl fmt::Debug for ScriptBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBindings")
            .field("environments", &self.objects.len())
            .finish()
    }
}
