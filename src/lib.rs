// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod errors;     // error taxonomy
pub mod executor;   // executor descriptions + dependency specs
pub mod extension;  // wrap pipeline
pub mod flow;       // flow engine over pods
pub mod observability;
pub mod schema;     // validation adapter contract
pub mod scope;      // scopes, pods, accessors
pub mod tag;        // tags, stores, metas
