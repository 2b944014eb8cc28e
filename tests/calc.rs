//! A consumer-shaped pipeline: source text -> parsed terms -> evaluation,
//! with variable bindings as separate inputs.
//!
//! This mirrors how an embedding program is expected to use the engine:
//! wrap external state in signals, wrap each derived artifact in a memo,
//! and let verification decide what actually reruns after an edit.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cell_flow::{Durability, Memo, Runtime, Signal};

/// A parsed sum of terms: integer literals and variable references.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Number(i64),
    Variable(String),
}

/// Parse `"a + 2 + b"` into terms. Whitespace is insignificant, so
/// reformatting the source parses to an equal value — which is exactly
/// what backdating needs to cut recomputation off.
fn parse(source: &str) -> Vec<Term> {
    source
        .split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<i64>() {
            Ok(n) => Term::Number(n),
            Err(_) => Term::Variable(part.to_string()),
        })
        .collect()
}

struct Calculator {
    source: Signal<String>,
    bindings: Signal<BTreeMap<String, i64>>,
    parsed: Memo<Vec<Term>>,
    value: Memo<i64>,
    parse_runs: Rc<Cell<u32>>,
    eval_runs: Rc<Cell<u32>>,
}

impl Calculator {
    fn new(rt: &Runtime, source: &str) -> Self {
        let source = Signal::with_label(rt, source.to_string(), Durability::Low, "source");
        let bindings = Signal::with_label(
            rt,
            BTreeMap::new(),
            Durability::Medium,
            "bindings",
        );

        let parse_runs = Rc::new(Cell::new(0));
        let eval_runs = Rc::new(Cell::new(0));

        let (src, probe) = (source.clone(), parse_runs.clone());
        let parsed = Memo::with_label(
            rt,
            move || {
                probe.set(probe.get() + 1);
                parse(&src.get())
            },
            "parsed",
        );

        let (terms, vars, probe) = (parsed.clone(), bindings.clone(), eval_runs.clone());
        let value = Memo::with_label(
            rt,
            move || {
                probe.set(probe.get() + 1);
                let env = vars.get();
                terms
                    .get()
                    .iter()
                    .map(|term| match term {
                        Term::Number(n) => *n,
                        Term::Variable(name) => env.get(name).copied().unwrap_or(0),
                    })
                    .sum()
            },
            "value",
        );

        Calculator {
            source,
            bindings,
            parsed,
            value,
            parse_runs,
            eval_runs,
        }
    }

    fn bind(&self, name: &str, value: i64) {
        self.bindings.update(|env| {
            let mut env = env.clone();
            env.insert(name.to_string(), value);
            env
        });
    }
}

#[test]
fn evaluates_sources_with_variables() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "1 + 2 + x");
    calc.bind("x", 39);
    assert_eq!(calc.value.get(), 42);
}

#[test]
fn edits_recompute_only_what_they_touch() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "x + 1");
    calc.bind("x", 10);
    assert_eq!(calc.value.get(), 11);
    assert_eq!(calc.parse_runs.get(), 1);
    assert_eq!(calc.eval_runs.get(), 1);

    // Rebinding a variable re-evaluates without reparsing.
    calc.bind("x", 20);
    assert_eq!(calc.value.get(), 21);
    assert_eq!(calc.parse_runs.get(), 1);
    assert_eq!(calc.eval_runs.get(), 2);

    // Editing the source reparses and re-evaluates.
    calc.source.set("x + 2".to_string());
    assert_eq!(calc.value.get(), 22);
    assert_eq!(calc.parse_runs.get(), 2);
    assert_eq!(calc.eval_runs.get(), 3);
}

#[test]
fn reformatting_the_source_is_invisible_past_the_parser() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "1+2+3");
    assert_eq!(calc.value.get(), 6);
    assert_eq!(calc.eval_runs.get(), 1);

    // Same terms, different spelling: the parser reruns, parses an equal
    // term list, and backdating spares the evaluator.
    calc.source.set("1 + 2 + 3".to_string());
    assert_eq!(calc.value.get(), 6);
    assert_eq!(calc.parse_runs.get(), 2);
    assert_eq!(calc.eval_runs.get(), 1);
}

#[test]
fn batched_edits_settle_in_one_step() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "x + y");
    calc.bind("x", 1);
    calc.bind("y", 2);
    assert_eq!(calc.value.get(), 3);
    let evals = calc.eval_runs.get();
    let parses = calc.parse_runs.get();

    // Source and bindings change together; downstream settles once.
    rt.batch(|| {
        calc.source.set("x + y + 10".to_string());
        calc.bind("x", 100);
    });
    assert_eq!(calc.value.get(), 112);
    assert_eq!(calc.eval_runs.get(), evals + 1);
    assert_eq!(calc.parse_runs.get(), parses + 1);
}

#[test]
fn unused_variables_are_not_dependencies() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "x");
    calc.bind("x", 1);
    assert_eq!(calc.value.get(), 1);

    // The evaluator depends on the whole binding map, so this still
    // recomputes; the parsed terms, though, never depend on bindings.
    let parsed_info = rt.cell_info(calc.parsed.id()).expect("registered");
    assert_eq!(parsed_info.dependencies, vec![calc.source.id()]);
    assert_eq!(parsed_info.durability, Durability::Low);
}

#[test]
fn rebinding_the_same_value_is_a_no_op() {
    let rt = Runtime::new();
    let calc = Calculator::new(&rt, "x");
    calc.bind("x", 5);
    assert_eq!(calc.value.get(), 5);
    let evals = calc.eval_runs.get();

    calc.bind("x", 5); // equal map, short-circuited at the signal
    assert_eq!(calc.value.get(), 5);
    assert_eq!(calc.eval_runs.get(), evals);
}
