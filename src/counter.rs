//! The event counter: dataset loading, the command language, and the loop
//! that serves commands against an [`EventTree`].
//!
//! A dataset is a count `n` followed by `n` whitespace-separated
//! `id count` pairs. Commands are one per line:
//!
//! ```text
//! increase <id> <m>    add m to the count of id, print the new count
//! reduce <id> <m>      subtract m; at zero or below the event is removed
//! count <id>           print the count of id (0 if absent)
//! inrange <id1> <id2>  print the total count of ids in id1..=id2
//! next <id>            print the event with the least id above id, or "0 0"
//! previous <id>        print the event with the greatest id below id, or "0 0"
//! quit                 stop
//! ```

use crate::{ConstructionFault, Count, CounterError, EventId, EventTree, NodeRef, TreeError};
use log::{debug, info, warn};
use std::fmt;
use std::io::{BufRead, Read, Write};
use std::str::FromStr;

/// Parse a dataset: a pair count followed by that many `id count` pairs.
pub fn parse_dataset<R: Read>(mut reader: R) -> Result<Vec<(EventId, Count)>, CounterError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let mut tokens = text.split_whitespace();

    let n: usize = match tokens.next() {
        Some(token) => token
            .parse()
            .map_err(|_| CounterError::Dataset(format!("invalid pair count {token:?}")))?,
        None => return Err(CounterError::Dataset("empty input".to_string())),
    };

    let mut next_number = |what: &str, index: usize| -> Result<i64, CounterError> {
        let token = tokens.next().ok_or_else(|| {
            CounterError::Dataset(format!("expected {n} pairs, input ends in pair {index}"))
        })?;
        token
            .parse()
            .map_err(|_| CounterError::Dataset(format!("invalid {what} {token:?} in pair {index}")))
    };

    let mut pairs = Vec::with_capacity(n.min(1 << 20));
    for index in 0..n {
        let id = next_number("id", index)?;
        let count = next_number("count", index)?;
        pairs.push((id, count));
    }

    if let Some(extra) = tokens.next() {
        return Err(CounterError::Dataset(format!(
            "unexpected token {extra:?} after {n} pairs"
        )));
    }
    Ok(pairs)
}

/// Counts in a dataset start at zero or above, whatever order the ids come in.
fn reject_negative(pairs: &[(EventId, Count)]) -> Result<(), TreeError> {
    match pairs.iter().position(|&(_, count)| count < 0) {
        Some(index) => {
            let (id, count) = pairs[index];
            Err(TreeError::InvalidConstruction {
                index,
                reason: ConstructionFault::NegativeCount { id, count },
            })
        }
        None => Ok(()),
    }
}

/// One line of the command language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Increase { id: EventId, amount: Count },
    Reduce { id: EventId, amount: Count },
    Count { id: EventId },
    InRange { lo: EventId, hi: EventId },
    Next { id: EventId },
    Previous { id: EventId },
    Quit,
}

impl FromStr for Command {
    type Err = CounterError;

    fn from_str(line: &str) -> Result<Self, CounterError> {
        let fail = |reason: String| CounterError::Command {
            line: line.to_string(),
            reason,
        };
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| fail("empty command".to_string()))?;
        let arity = match name {
            "increase" | "reduce" | "inrange" => 2,
            "count" | "next" | "previous" => 1,
            "quit" => 0,
            _ => return Err(fail(format!("unknown command {name:?}"))),
        };
        let words: Vec<&str> = words.collect();
        if words.len() != arity {
            return Err(fail(format!(
                "{name} takes {arity} arguments, got {}",
                words.len()
            )));
        }
        let args: Vec<i64> = words
            .iter()
            .map(|word| {
                word.parse()
                    .map_err(|_| fail(format!("{word:?} is not an integer")))
            })
            .collect::<Result<_, _>>()?;

        Ok(match name {
            "increase" => Command::Increase {
                id: args[0],
                amount: args[1],
            },
            "reduce" => Command::Reduce {
                id: args[0],
                amount: args[1],
            },
            "inrange" => Command::InRange {
                lo: args[0],
                hi: args[1],
            },
            "count" => Command::Count { id: args[0] },
            "next" => Command::Next { id: args[0] },
            "previous" => Command::Previous { id: args[0] },
            _ => Command::Quit,
        })
    }
}

/// Result of a command, printed one per line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    /// A single count (`increase`, `reduce`, `count`, `inrange`).
    Count(Count),
    /// An event, or `None` printed as `0 0` (`next`, `previous`).
    Event(Option<(EventId, Count)>),
    /// `quit`: nothing is printed.
    Quit,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Count(count) => write!(f, "{count}"),
            Reply::Event(Some((id, count))) => write!(f, "{id} {count}"),
            Reply::Event(None) => f.write_str("0 0"),
            Reply::Quit => Ok(()),
        }
    }
}

/// Reply with the count of a node just updated, removing the event once the
/// count is no longer positive.
fn settle(tree: &mut EventTree, id: EventId, node: NodeRef) -> Reply {
    let count = tree.count(node);
    if count > 0 {
        return Reply::Count(count);
    }
    if let Err(err) = tree.delete(node) {
        unreachable!("node for {id} was just updated: {err}");
    }
    debug!("event {id} dropped to {count}, removed");
    Reply::Count(0)
}

/// An [`EventTree`] driven by the command language.
#[derive(Clone, Debug, Default)]
pub struct EventCounter {
    tree: EventTree,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from dataset pairs, in linear time when they are sorted and
    /// unique.
    ///
    /// Unsorted input is still accepted: pairs are then inserted one at a
    /// time, and repeated ids accumulate. A negative count is an error.
    pub fn from_dataset(pairs: &[(EventId, Count)]) -> Result<Self, CounterError> {
        reject_negative(pairs)?;
        match EventTree::from_sorted(pairs) {
            Ok(tree) => {
                info!("loaded {} events by bulk construction", tree.len());
                Ok(Self { tree })
            }
            Err(err) => {
                warn!("dataset not suitable for bulk construction ({err}), inserting one by one");
                Self::from_dataset_incremental(pairs)
            }
        }
    }

    /// Build from dataset pairs by inserting them one at a time.
    pub fn from_dataset_incremental(pairs: &[(EventId, Count)]) -> Result<Self, CounterError> {
        reject_negative(pairs)?;
        let tree: EventTree = pairs.iter().copied().collect();
        info!("loaded {} events by insertion", tree.len());
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &EventTree {
        &self.tree
    }

    pub fn execute(&mut self, command: Command) -> Reply {
        let tree = &mut self.tree;
        match command {
            Command::Increase { id, amount } => {
                let node = tree.insert(id, amount);
                settle(tree, id, node)
            }
            Command::Reduce { id, amount } => {
                if let Err(err) = tree.lookup(id) {
                    debug!("reduce: {err}");
                    return Reply::Count(0);
                }
                let node = tree.insert(id, amount.saturating_neg());
                settle(tree, id, node)
            }
            Command::Count { id } => {
                Reply::Count(tree.lookup(id).map_or(0, |node| tree.count(node)))
            }
            Command::InRange { lo, hi } => Reply::Count(tree.range_sum(lo, hi)),
            Command::Next { id } => Reply::Event(tree.next_after(id).map(|n| tree.entry(n))),
            Command::Previous { id } => {
                Reply::Event(tree.prev_before(id).map(|n| tree.entry(n)))
            }
            Command::Quit => Reply::Quit,
        }
    }

    /// Serve commands from `input` until `quit` or end of input.
    ///
    /// Blank lines are ignored. Malformed lines are logged and skipped.
    /// Returns the number of commands executed.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<usize, CounterError> {
        let mut executed = 0;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(err) => {
                    warn!("skipping {err}");
                    continue;
                }
            };
            executed += 1;
            match self.execute(command) {
                Reply::Quit => break,
                reply => writeln!(output, "{reply}")?,
            }
        }
        output.flush()?;
        Ok(executed)
    }
}
