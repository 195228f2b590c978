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

//! # skillshare
//!
//! A backend for sharing what you're learning: users follow one another, post about their skills,
//! pledge to join each other's challenges, share resources & keep learning plans.
//!
//! The library holds everything; the `skillshared` binary is just configuration, logging &
//! serving. The library crate has the same name as the package, meaning that `rustdoc` will
//! ignore the binary.
pub mod authn;
pub mod comments;
pub mod commitments;
pub mod dynamodb;
pub mod engagement;
pub mod entities;
pub mod feed;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod peppers;
pub mod plans;
pub mod posts;
pub mod relationships;
pub mod resources;
#[path = "signing-keys.rs"]
pub mod signing_keys;
pub mod skillshare;
pub mod storage;
pub mod token;
pub mod users;
pub mod util;
