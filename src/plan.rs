//! Step registry and dependency-ordered plans.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{ProvisionError, ProvisionResult};
use crate::step::StepDefinition;

/// Steps in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: StepDefinition) -> ProvisionResult<()> {
        if self.index.contains_key(&step.id) {
            return Err(ProvisionError::DuplicateStepId(step.id));
        }
        self.index.insert(step.id.clone(), self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Topologically order the registered steps. Independent steps
    /// keep their registration order, so the same registry always
    /// yields the same plan.
    pub fn build_plan(&self) -> ProvisionResult<Plan<'_>> {
        let count = self.steps.len();
        let mut pending_deps = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.dependencies {
                let &d = self
                    .index
                    .get(dep)
                    .ok_or_else(|| ProvisionError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    })?;
                pending_deps[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending_deps[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                pending_deps[dependent] -= 1;
                if pending_deps[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let remaining: HashSet<usize> = (0..count).filter(|&i| pending_deps[i] > 0).collect();
            return Err(ProvisionError::CyclicDependency(self.find_cycle(&remaining)));
        }

        Ok(Plan {
            steps: order.into_iter().map(|i| &self.steps[i]).collect(),
        })
    }

    /// Every step left after Kahn's algorithm still waits on another
    /// leftover step, so following dependencies must loop.
    fn find_cycle(&self, remaining: &HashSet<usize>) -> Vec<String> {
        let Some(&start) = remaining.iter().min() else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = path.iter().position(|&p| p == current) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&i| self.steps[i].id.clone()).collect();
                cycle.push(self.steps[current].id.clone());
                return cycle;
            }
            path.push(current);

            let next = self.steps[current]
                .dependencies
                .iter()
                .filter_map(|d| self.index.get(d).copied())
                .find(|i| remaining.contains(i));
            match next {
                Some(n) => current = n,
                None => return path.iter().map(|&i| self.steps[i].id.clone()).collect(),
            }
        }
    }
}

/// Dependency-ordered view over a registry.
#[derive(Debug)]
pub struct Plan<'r> {
    steps: Vec<&'r StepDefinition>,
}

impl<'r> Plan<'r> {
    #[must_use]
    pub fn steps(&self) -> &[&'r StepDefinition] {
        &self.steps
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&'r str> {
        self.steps.iter().copied().map(|s| s.id.as_str()).collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&'r StepDefinition> {
        self.steps.iter().copied().find(|s| s.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that directly or transitively depend on `id`, in plan
    /// order.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&'r str> {
        let mut affected: HashSet<&str> = HashSet::from([id]);
        let mut out = Vec::new();
        for step in self.steps.iter().copied() {
            if step
                .dependencies
                .iter()
                .any(|d| affected.contains(d.as_str()))
            {
                affected.insert(step.id.as_str());
                out.push(step.id.as_str());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionResult;
    use crate::step::{Outcome, Step, StepContext};

    struct Noop;

    impl Step for Noop {
        fn precondition(&self, _ctx: &StepContext<'_>) -> ProvisionResult<bool> {
            Ok(true)
        }

        fn apply(&self, _ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
            Ok(Outcome::Applied)
        }
    }

    fn step(id: &str, deps: &[&str]) -> StepDefinition {
        deps.iter()
            .fold(StepDefinition::new(id, id, Noop), |def, d| def.after(d))
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut registry = Registry::new();
        registry.register(step("a", &[])).unwrap();

        let err = registry.register(step("a", &[])).unwrap_err();

        assert!(matches!(err, ProvisionError::DuplicateStepId(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn independent_steps_keep_registration_order() {
        let mut registry = Registry::new();
        for id in ["c", "a", "b"] {
            registry.register(step(id, &[])).unwrap();
        }

        assert_eq!(registry.build_plan().unwrap().ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn ids_borrow_from_registry() {
        let mut registry = Registry::new();
        registry.register(step("a", &[])).unwrap();
        registry.register(step("b", &["a"])).unwrap();

        let ids = registry.build_plan().unwrap().ids();
        let dependents = registry.build_plan().unwrap().dependents_of("a");

        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(dependents, vec!["b"]);
    }

    #[test]
    fn dependencies_come_first() {
        let mut registry = Registry::new();
        registry.register(step("deploy", &["install"])).unwrap();
        registry.register(step("install", &["update"])).unwrap();
        registry.register(step("update", &[])).unwrap();

        assert_eq!(
            registry.build_plan().unwrap().ids(),
            vec!["update", "install", "deploy"]
        );
    }

    #[test]
    fn ties_broken_by_registration_index() {
        let mut registry = Registry::new();
        registry.register(step("root", &[])).unwrap();
        registry.register(step("late", &["mid"])).unwrap();
        registry.register(step("mid", &["root"])).unwrap();
        registry.register(step("side", &["root"])).unwrap();

        assert_eq!(
            registry.build_plan().unwrap().ids(),
            vec!["root", "mid", "late", "side"]
        );
    }

    #[test]
    fn unknown_dependency_rejected() {
        let mut registry = Registry::new();
        registry.register(step("a", &["ghost"])).unwrap();

        let err = registry.build_plan().unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::UnknownDependency { step, dependency }
                if step == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn cycle_reported_with_members() {
        let mut registry = Registry::new();
        registry.register(step("free", &[])).unwrap();
        registry.register(step("a", &["c"])).unwrap();
        registry.register(step("b", &["a"])).unwrap();
        registry.register(step("c", &["b"])).unwrap();

        let err = registry.build_plan().unwrap_err();

        match err {
            ProvisionError::CyclicDependency(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                for id in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|s| s == id));
                }
                assert!(!cycle.iter().any(|s| s == "free"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut registry = Registry::new();
        registry.register(step("a", &["a"])).unwrap();

        assert!(matches!(
            registry.build_plan(),
            Err(ProvisionError::CyclicDependency(_))
        ));
    }

    #[test]
    fn dependents_are_transitive() {
        let mut registry = Registry::new();
        registry.register(step("a", &[])).unwrap();
        registry.register(step("b", &["a"])).unwrap();
        registry.register(step("c", &["b"])).unwrap();
        registry.register(step("d", &[])).unwrap();
        let plan = registry.build_plan().unwrap();

        assert_eq!(plan.dependents_of("a"), vec!["b", "c"]);
        assert!(plan.dependents_of("d").is_empty());
        assert_eq!(plan.get("c").map(|s| s.label.as_str()), Some("c"));
    }
}
