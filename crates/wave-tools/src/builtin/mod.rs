// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod ask_user_question;
pub mod bash;
pub mod delete;
pub mod edit;
pub mod glob;
pub mod grep;
pub mod ls;
pub mod memory_write;
pub mod plan;
pub mod read;
pub mod skill;
pub mod task_query;
pub mod todo_write;
pub mod write;
