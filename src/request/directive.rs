// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Display, Formatter};

/// What the `Session` header of a request asks the server to do.
///
/// | header      | meaning                                   |
/// |-------------|-------------------------------------------|
/// | `*`         | create a session, reply with its token    |
/// | `-`         | no session                                |
/// | `~<token>`  | use the session, close it after replying  |
/// | `<token>`   | use the session                           |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDirective {
    Create,
    NoSession,
    Use(String),
    CloseAfterUse(String),
}

impl SessionDirective {
    pub const CREATE: &'static str = "*";
    pub const NO_SESSION: &'static str = "-";
    pub const CLOSE_PREFIX: char = '~';

    /// A missing or empty header, or a bare `~`, means no session.
    pub fn parse(value: Option<&str>) -> SessionDirective {
        match value {
            None | Some("") | Some(Self::NO_SESSION) => SessionDirective::NoSession,
            Some(Self::CREATE) => SessionDirective::Create,
            Some(value) => match value.strip_prefix(Self::CLOSE_PREFIX) {
                Some("") => SessionDirective::NoSession,
                Some(token) => SessionDirective::CloseAfterUse(token.to_string()),
                None => SessionDirective::Use(value.to_string()),
            },
        }
    }

    /// Token of an existing session the request refers to.
    pub fn token(&self) -> Option<&str> {
        match self {
            SessionDirective::Use(token) | SessionDirective::CloseAfterUse(token) => Some(token),
            SessionDirective::Create | SessionDirective::NoSession => None,
        }
    }

    pub fn closes_after_use(&self) -> bool {
        matches!(self, SessionDirective::CloseAfterUse(_))
    }
}

impl Display for SessionDirective {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionDirective::Create => write!(f, "{}", Self::CREATE),
            SessionDirective::NoSession => write!(f, "{}", Self::NO_SESSION),
            SessionDirective::Use(token) => write!(f, "{}", token),
            SessionDirective::CloseAfterUse(token) => write!(f, "{}{}", Self::CLOSE_PREFIX, token),
        }
    }
}
