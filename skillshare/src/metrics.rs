// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of skillshare.
//
// skillshare is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// skillshare is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with skillshare.  If not,
// see <http://www.gnu.org/licenses/>.

//! # skillshare metrics
//!
//! skillshare counts things (sign-ups, follows, likes, failures of each) with [OpenTelemetry]
//! instruments. OTel asks that instruments be created once & re-used, which raises the question of
//! where to keep them. Rather than a field per counter on the application state, each metric is
//! registered by name next to the code that bumps it:
//!
//! [OpenTelemetry]: https://docs.rs/opentelemetry/latest/opentelemetry/index.html
//!
//! ```ignore
//! inventory::submit!{metrics::Registration::new("posts.likes.successes", Sort::IntegralCounter)}
//! // ...
//! async fn like() {
//!     // ...
//!     counter_add!(state.instruments, "posts.likes.successes", 1, &[]);
//! }
//! ```
//!
//! David Tolnay's [inventory] crate collects the registrations at link time. [Instruments::new]
//! walks them, checks for name clashes & builds every instrument up-front, so that bumping a
//! counter only needs `&self` (and the [Instruments] can live in an `Arc`'d state).
//!
//! Looking-up an unregistered name, or the wrong sort of instrument, panics. That's a logic error,
//! not a runtime condition.

use std::collections::{HashMap, HashSet};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    KeyValue,
};

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to `Counter<u64>`
    IntegralCounter,
    /// `Gauge<u64>`
    IntegralGauge,
}

/// A metric, by name & [Sort]; submit these to [inventory]
///
/// ```ignore
/// inventory::submit!{metrics::Registration::new("users.follows.successes", Sort::IntegralCounter)}
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, sort: Sort) -> Registration {
        Registration { name, sort }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

fn registrations() -> impl Iterator<Item = &'static Registration> {
    inventory::iter::<Registration>.into_iter()
}

/// Panic if two registrations share a name
///
/// Call this at startup, before the meter provider is installed, so that a clash is caught before
/// any request is served.
pub fn check_metric_registrations() {
    let mut seen = HashSet::new();
    if let Some(dup) = registrations().find(|reg| !seen.insert(reg.name())) {
        panic!("The metric name {} was registered twice", dup.name());
    }
}

enum Instrument {
    Counter(Counter<u64>),
    Gauge(Gauge<u64>),
}

/// Every registered instrument, built up-front & looked-up by name
pub struct Instruments {
    by_name: HashMap<&'static str, Instrument>,
}

impl Instruments {
    /// Build an instrument for each [Registration] from the global meter provider
    ///
    /// Whatever provider is installed when this is called is the one that'll be used; in tests
    /// that's the no-op provider.
    pub fn new(scope: &'static str) -> Instruments {
        check_metric_registrations();
        let meter = global::meter(scope);
        let by_name = registrations()
            .map(|reg| {
                let instrument = match reg.sort() {
                    Sort::IntegralCounter => Instrument::Counter(meter.u64_counter(reg.name()).build()),
                    Sort::IntegralGauge => Instrument::Gauge(meter.u64_gauge(reg.name()).build()),
                };
                (reg.name(), instrument)
            })
            .collect();
        Instruments { by_name }
    }
    /// Whether `name` has been registered (as anything)
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64, attributes: &[KeyValue]) {
        match self.by_name.get(name) {
            Some(Instrument::Counter(counter)) => counter.add(count, attributes),
            _ => panic!("{} does not name a counter", name),
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn recordu(&self, name: &str, value: u64, attributes: &[KeyValue]) {
        match self.by_name.get(name) {
            Some(Instrument::Gauge(gauge)) => gauge.record(value, attributes),
            _ => panic!("{} does not name a gauge", name),
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr, $attrs:expr) => {
        $instr.add($name, $count, $attrs);
    };
}

#[macro_export]
macro_rules! gauge_setu {
    ($instr:expr, $name:expr, $value:expr, $attrs:expr) => {
        $instr.recordu($name, $value, $attrs);
    };
}
