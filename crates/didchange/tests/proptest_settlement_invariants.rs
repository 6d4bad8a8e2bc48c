//! Property-based invariant tests for the did-change subscription.
//!
//! 1. Coalescing: K ≥ 1 will-change signals in one turn settle exactly once
//!    and evaluate the selector at most once.
//! 2. Model agreement: state, demand, delivered values and completion match a
//!    reference model of the settlement machine for arbitrary operation
//!    sequences.
//! 3. Demand conservation: deliveries never exceed the demand granted
//!    (initial requests plus increments returned from `on_next`).
//! 4. No delivery without demand: with zero demand a settlement parks in
//!    `DidChange` and computes nothing.
//! 5. Cancellation: nothing is delivered or completed after `cancel`, however
//!    often it is called.
//! 6. Completion: at most one completion, and no values after it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use didchange::{
    Demand, ObservableObject, Observe, RunLoop, SettlementState, Sink, SubscriptionHandle,
};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Op {
    /// Mutate the source (always to a new value).
    Set,
    /// Run one run-loop turn.
    Turn,
    Request(Demand),
    Cancel,
    Finish,
}

fn demand_strategy() -> impl Strategy<Value = Demand> {
    prop_oneof![
        6 => (0u64..=3).prop_map(Demand::max),
        1 => Just(Demand::UNLIMITED),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => Just(Op::Set),
        5 => Just(Op::Turn),
        4 => demand_strategy().prop_map(Op::Request),
        1 => Just(Op::Cancel),
        1 => Just(Op::Finish),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..=max_len)
}

// ── Reference model ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Model {
    value: i64,
    state: SettlementState,
    demand: Demand,
    queued: usize,
    delivered: Vec<i64>,
    completed: bool,
    source_finished: bool,
    per_value: Demand,
    granted: Demand,
}

impl Model {
    fn new(per_value: Demand) -> Self {
        Self {
            value: 0,
            state: SettlementState::DidChange,
            demand: Demand::NONE,
            queued: 0,
            delivered: Vec::new(),
            completed: false,
            source_finished: false,
            per_value,
            granted: Demand::NONE,
        }
    }

    fn attached(&self) -> bool {
        !self.state.is_cancelled() && !self.source_finished
    }

    fn service(&mut self) {
        if self.demand.is_positive() && self.state == SettlementState::DidChange {
            self.state = SettlementState::Unchanged;
            self.demand = self.demand.consume_one();
            self.delivered.push(self.value);
            self.demand += self.per_value;
            self.granted += self.per_value;
        }
    }

    fn request(&mut self, demand: Demand) {
        if self.state.is_cancelled() {
            return;
        }
        self.demand += demand;
        self.granted += demand;
        self.service();
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Set => {
                self.value += 1;
                if self.attached() {
                    match self.state {
                        SettlementState::Unchanged | SettlementState::DidChange => {
                            self.state = SettlementState::WillChange;
                            self.queued += 1;
                        }
                        SettlementState::WillChange | SettlementState::Cancelled => {}
                    }
                }
            }
            Op::Turn => {
                for _ in 0..std::mem::take(&mut self.queued) {
                    if !self.state.is_cancelled() {
                        self.state = SettlementState::DidChange;
                        self.service();
                    }
                }
            }
            Op::Request(demand) => self.request(demand),
            Op::Cancel => {
                if !self.state.is_cancelled() {
                    self.state = SettlementState::Cancelled;
                }
            }
            Op::Finish => {
                let was_attached = self.attached();
                self.source_finished = true;
                if was_attached && self.state == SettlementState::Unchanged {
                    self.completed = true;
                }
            }
        }
    }
}

// ── Harness ───────────────────────────────────────────────────────────────

struct Harness {
    run_loop: RunLoop,
    source: Rc<ObservableObject<i64>>,
    handle: SubscriptionHandle,
    values: Rc<RefCell<Vec<i64>>>,
    completions: Rc<Cell<u32>>,
    selector_calls: Rc<Cell<u32>>,
}

impl Harness {
    fn new(initial: Demand, per_value: Demand) -> Self {
        let run_loop = RunLoop::new();
        let source = Rc::new(ObservableObject::new(0i64));
        let values = Rc::new(RefCell::new(Vec::new()));
        let completions = Rc::new(Cell::new(0u32));
        let selector_calls = Rc::new(Cell::new(0u32));

        let calls = Rc::clone(&selector_calls);
        let values_in = Rc::clone(&values);
        let completions_in = Rc::clone(&completions);
        let handle = source
            .observe_map(run_loop.clone(), move |s| {
                calls.set(calls.get() + 1);
                s.get()
            })
            .subscribe(
                Sink::new(move |v: i64| values_in.borrow_mut().push(v))
                    .with_initial_demand(initial)
                    .with_demand_per_value(per_value)
                    .with_on_complete(move || completions_in.set(completions_in.get() + 1)),
            );

        Self {
            run_loop,
            source,
            handle,
            values,
            completions,
            selector_calls,
        }
    }

    fn apply(&self, op: Op) {
        match op {
            Op::Set => self.source.update(|v| *v += 1),
            Op::Turn => {
                self.run_loop.run_pending();
            }
            Op::Request(demand) => self.handle.request(demand),
            Op::Cancel => self.handle.cancel(),
            Op::Finish => self.source.finish(),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Properties
// ═════════════════════════════════════════════════════════════════════════

// 1. Coalescing

proptest! {
    #[test]
    fn burst_of_signals_settles_once(k in 1usize..=64) {
        let h = Harness::new(Demand::NONE, Demand::NONE);
        for _ in 0..k {
            h.apply(Op::Set);
        }
        prop_assert_eq!(h.run_loop.pending(), 1);
        h.run_loop.run_until_idle().unwrap();

        let stats = h.handle.stats();
        prop_assert_eq!(stats.settlements, 1);
        prop_assert_eq!(stats.coalesced_signals, k as u64 - 1);
        prop_assert_eq!(h.selector_calls.get(), 0);

        h.handle.request(Demand::UNLIMITED);
        prop_assert_eq!(h.selector_calls.get(), 1);
        prop_assert_eq!(h.values.borrow().clone(), vec![k as i64]);
    }
}

// 2. Model agreement

proptest! {
    #[test]
    fn subscription_matches_model(
        initial in demand_strategy(),
        per_value in demand_strategy(),
        ops in ops_strategy(80),
    ) {
        let h = Harness::new(initial, per_value);
        let mut model = Model::new(per_value);
        model.request(initial);

        for (step, &op) in ops.iter().enumerate() {
            h.apply(op);
            model.apply(op);
            prop_assert_eq!(h.handle.state(), model.state, "state after step {} ({:?})", step, op);
            prop_assert_eq!(h.handle.demand(), model.demand, "demand after step {} ({:?})", step, op);
            prop_assert_eq!(h.values.borrow().clone(), model.delivered.clone(), "values after step {}", step);
            prop_assert_eq!(h.handle.is_completed(), model.completed, "completion after step {}", step);
        }
    }
}

// 3. Demand conservation

proptest! {
    #[test]
    fn deliveries_bounded_by_granted_demand(
        initial in demand_strategy(),
        per_value in demand_strategy(),
        ops in ops_strategy(80),
    ) {
        let h = Harness::new(initial, per_value);
        let mut model = Model::new(per_value);
        model.request(initial);
        for &op in &ops {
            h.apply(op);
            model.apply(op);
            if let Some(granted) = model.granted.count() {
                prop_assert!(
                    h.values.borrow().len() as u64 <= granted,
                    "delivered {} with only {} granted",
                    h.values.borrow().len(),
                    granted
                );
            }
            prop_assert_eq!(h.handle.stats().delivered, h.values.borrow().len() as u64);
        }
    }
}

// 4. No delivery without demand

proptest! {
    #[test]
    fn zero_demand_parks_in_did_change(bursts in 1usize..=8) {
        let h = Harness::new(Demand::NONE, Demand::NONE);
        for _ in 0..bursts {
            h.apply(Op::Set);
            h.apply(Op::Set);
            h.apply(Op::Turn);
            prop_assert_eq!(h.handle.state(), SettlementState::DidChange);
        }
        prop_assert!(h.values.borrow().is_empty());
        prop_assert_eq!(h.selector_calls.get(), 0);
        prop_assert_eq!(h.handle.stats().settlements, bursts as u64);
    }
}

// 5. Cancellation

proptest! {
    #[test]
    fn nothing_after_cancel(
        cancels in 1usize..=3,
        ops in ops_strategy(40),
    ) {
        let h = Harness::new(Demand::UNLIMITED, Demand::max(1));
        for _ in 0..cancels {
            h.handle.cancel();
        }
        let delivered = h.values.borrow().len();
        let completions = h.completions.get();
        for &op in &ops {
            h.apply(op);
        }
        h.run_loop.run_until_idle().unwrap();
        prop_assert!(h.handle.is_cancelled());
        prop_assert_eq!(h.values.borrow().len(), delivered);
        prop_assert_eq!(h.completions.get(), completions);
        prop_assert_eq!(h.handle.stats().delivered, delivered as u64);
    }
}

// 6. Completion

proptest! {
    #[test]
    fn completion_is_terminal(ops in ops_strategy(60)) {
        let h = Harness::new(Demand::UNLIMITED, Demand::NONE);
        let mut seen_after_completion = None;
        for &op in &ops {
            h.apply(op);
            if h.completions.get() > 0 && seen_after_completion.is_none() {
                seen_after_completion = Some(h.values.borrow().len());
            }
        }
        h.run_loop.run_until_idle().unwrap();
        prop_assert!(h.completions.get() <= 1);
        if let Some(count) = seen_after_completion {
            prop_assert_eq!(h.values.borrow().len(), count);
            prop_assert!(h.handle.is_completed());
        }
    }
}
