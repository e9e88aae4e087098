// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide runtime configuration (spec.md §6's configuration flags and
//! platform description), replacing the original's global mutable flags
//! with a single struct built once at `start()` (spec.md §9).

use crate::schedule::Platform;

/// Closed set of independently-enabled log channels (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogChannel {
    Lrt,
    Time,
    General,
    Schedule,
    Memory,
    Transfo,
    Optims,
    Expr,
}

const ALL_CHANNELS: [LogChannel; 8] = [
    LogChannel::Lrt,
    LogChannel::Time,
    LogChannel::General,
    LogChannel::Schedule,
    LogChannel::Memory,
    LogChannel::Transfo,
    LogChannel::Optims,
    LogChannel::Expr,
];

/// Read-only after `start()`: configuration flags, log channel enablement,
/// and the target platform description (spec.md §6).
#[derive(Clone)]
pub struct RuntimeContext {
    export_trace: bool,
    export_srdag: bool,
    export_gantt: bool,
    use_svg_gantt: bool,
    verbose: bool,
    optimize_srdag: bool,
    enabled_channels: Vec<LogChannel>,
    platform: Platform,
}

impl RuntimeContext {
    pub fn builder(platform: Platform) -> RuntimeContextBuilder {
        RuntimeContextBuilder::new(platform)
    }

    pub fn export_trace(&self) -> bool {
        self.export_trace
    }

    pub fn export_srdag(&self) -> bool {
        self.export_srdag
    }

    pub fn export_gantt(&self) -> bool {
        self.export_gantt
    }

    pub fn use_svg_gantt(&self) -> bool {
        self.use_svg_gantt
    }

    pub fn optimize_srdag(&self) -> bool {
        self.optimize_srdag
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn channel_enabled(&self, channel: LogChannel) -> bool {
        self.verbose || self.enabled_channels.contains(&channel)
    }
}

/// Builds a [`RuntimeContext`]; every flag defaults per spec.md §6.
pub struct RuntimeContextBuilder {
    export_trace: bool,
    export_srdag: bool,
    export_gantt: bool,
    use_svg_gantt: bool,
    verbose: bool,
    optimize_srdag: bool,
    enabled_channels: Vec<LogChannel>,
    platform: Platform,
}

impl RuntimeContextBuilder {
    pub fn new(platform: Platform) -> Self {
        RuntimeContextBuilder {
            export_trace: false,
            export_srdag: false,
            export_gantt: false,
            use_svg_gantt: false,
            verbose: false,
            optimize_srdag: true,
            enabled_channels: Vec::new(),
            platform,
        }
    }

    pub fn export_trace(mut self, value: bool) -> Self {
        self.export_trace = value;
        self
    }

    pub fn export_srdag(mut self, value: bool) -> Self {
        self.export_srdag = value;
        self
    }

    pub fn export_gantt(mut self, value: bool) -> Self {
        self.export_gantt = value;
        self
    }

    pub fn use_svg_gantt(mut self, value: bool) -> Self {
        self.use_svg_gantt = value;
        self
    }

    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn optimize_srdag(mut self, value: bool) -> Self {
        self.optimize_srdag = value;
        self
    }

    pub fn enable_channel(mut self, channel: LogChannel) -> Self {
        self.enabled_channels.push(channel);
        self
    }

    pub fn enable_all_channels(mut self) -> Self {
        self.enabled_channels = ALL_CHANNELS.to_vec();
        self
    }

    pub fn build(self) -> RuntimeContext {
        RuntimeContext {
            export_trace: self.export_trace,
            export_srdag: self.export_srdag,
            export_gantt: self.export_gantt,
            use_svg_gantt: self.use_svg_gantt,
            verbose: self.verbose,
            optimize_srdag: self.optimize_srdag,
            enabled_channels: self.enabled_channels,
            platform: self.platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let ctx = RuntimeContext::builder(Platform::new(1)).build();
        assert!(!ctx.export_trace());
        assert!(!ctx.export_srdag());
        assert!(ctx.optimize_srdag());
    }

    #[test]
    fn verbose_enables_every_channel() {
        let ctx = RuntimeContext::builder(Platform::new(1)).verbose(true).build();
        assert!(ctx.channel_enabled(LogChannel::Expr));
        let quiet = RuntimeContext::builder(Platform::new(1)).build();
        assert!(!quiet.channel_enabled(LogChannel::Expr));
    }

    #[test]
    fn single_channel_can_be_enabled_without_verbose() {
        let ctx = RuntimeContext::builder(Platform::new(1)).enable_channel(LogChannel::Schedule).build();
        assert!(ctx.channel_enabled(LogChannel::Schedule));
        assert!(!ctx.channel_enabled(LogChannel::Memory));
    }
}
