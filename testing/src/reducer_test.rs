//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use berth_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for output assertion functions
type OutputAssertion<O> = Box<dyn FnOnce(&O)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Type alias for the check every preceding output must pass
type GivenCheck<O> = Box<dyn Fn(&O) -> bool>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use berth_testing::ReducerTest;
///
/// ReducerTest::new(BookingReducer)
///     .with_env(test_environment())
///     .given_state(ShardState::default())
///     .when_action(BookingAction::Create { .. })
///     .then_output(|output| {
///         assert!(output.is_ok());
///     })
///     .then_state(|state| {
///         assert_eq!(state.bookings().count(), 1);
///     })
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    actions: Vec<R::Action>,
    given_check: Option<GivenCheck<R::Output>>,
    state_assertions: Vec<StateAssertion<R::State>>,
    output_assertions: Vec<OutputAssertion<R::Output>>,
    effect_assertions: Vec<EffectAssertion<R::Action>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            given_check: None,
            state_assertions: Vec::new(),
            output_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Apply an action before the one under test (Given)
    ///
    /// Preceding actions run in order against the same state; their effects
    /// are discarded and their outputs go through the
    /// [`expect_given`](Self::expect_given) check, if one is set.
    #[must_use]
    pub fn given_action(mut self, action: R::Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Require every preceding action's output to pass `check`
    ///
    /// A setup action that fails the check fails the test, so a scenario
    /// cannot silently build on a rejected step.
    #[must_use]
    pub fn expect_given<F>(mut self, check: F) -> Self
    where
        F: Fn(&R::Output) -> bool + 'static,
    {
        self.given_check = Some(Box::new(check));
        self
    }

    /// Set the action to test (When)
    ///
    /// This is the last action applied; outputs and effects are asserted
    /// against it.
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the reducer output for the action under test (Then)
    #[must_use]
    pub fn then_output<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Output) + 'static,
    {
        self.output_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<R::Action>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set,
    /// if a preceding output fails the `expect_given` check,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let mut actions = self.actions;
        let action = actions
            .pop()
            .expect("Action must be set with when_action()");

        for (index, preceding) in actions.into_iter().enumerate() {
            let (output, _effects) = self.reducer.reduce(&mut state, preceding, &env);
            if let Some(check) = &self.given_check {
                assert!(check(&output), "given action #{index} failed the expect_given check");
            }
        }

        let (output, effects) = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.output_assertions {
            assertion(&output);
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }

        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use berth_core::effect::Effect;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if any effect does something.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        fn contains_future<A>(effect: &Effect<A>) -> bool {
            match effect {
                Effect::Future(_) => true,
                Effect::Parallel(inner) | Effect::Sequential(inner) => {
                    inner.iter().any(contains_future)
                },
                Effect::None => false,
            }
        }

        assert!(
            effects.iter().any(contains_future),
            "Expected at least one Future effect, but none found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::effect::{Effect, Effects};
    use berth_core::reducer::Reducer;
    use berth_core::smallvec;

    #[derive(Clone, Debug)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
        Announce,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Output = i32;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> (i32, Effects<Self::Action>) {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    (state.count, smallvec![Effect::None])
                },
                TestAction::Decrement => {
                    state.count -= 1;
                    (state.count, smallvec![])
                },
                TestAction::Announce => (
                    state.count,
                    smallvec![Effect::merge(vec![Effect::fire_and_forget(async {})])],
                ),
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_output(|output| assert_eq!(*output, 1))
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assertions::assert_no_effects(effects);
            })
            .run();
    }

    #[test]
    fn test_given_actions_run_before_action_under_test() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 5 })
            .given_action(TestAction::Increment)
            .given_action(TestAction::Increment)
            .when_action(TestAction::Decrement)
            .then_output(|output| assert_eq!(*output, 6))
            .then_effects(|effects| assertions::assert_effects_count(effects, 0))
            .run();
    }

    #[test]
    fn test_given_outputs_pass_the_check() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .expect_given(|count| *count > 0)
            .given_action(TestAction::Increment)
            .given_action(TestAction::Increment)
            .when_action(TestAction::Decrement)
            .then_output(|output| assert_eq!(*output, 1))
            .run();
    }

    #[test]
    #[should_panic(expected = "given action #1 failed the expect_given check")]
    fn test_given_output_failing_the_check_fails_the_test() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .expect_given(|count| *count > 0)
            .given_action(TestAction::Increment)
            .given_action(TestAction::Decrement)
            .when_action(TestAction::Increment)
            .run();
    }

    #[test]
    fn test_nested_future_is_found() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Announce)
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }
}
