/// Configuration of a run session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct RunConfig {
    /// Whether to stop at the program's entry point.
    #[knus(child, default = true, unwrap(argument))]
    pub entry_breakpoint: bool,

    /// Number of instructions to single-step after each breakpoint hit.
    #[knus(child, default = 1, unwrap(argument))]
    pub step_count: u64,

    /// Whether to report the floating point registers.
    #[knus(child, default = false, unwrap(argument))]
    pub floating_point: bool,

    /// Maximum number of stops before the program is killed.
    #[knus(child, default = 64, unwrap(argument))]
    pub max_stops: usize,

    /// Breakpoints to arm before the program starts.
    #[knus(children(name = "breakpoint"))]
    pub breakpoints: Vec<BreakpointConfig>,
}

/// Configuration of a breakpoint.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Address of the breakpoint.
    #[knus(argument)]
    pub addr: u64,

    /// Whether `addr` is an offset from the program's entry point.
    #[knus(property(name = "from-entry"), default)]
    pub from_entry: bool,
}

impl BreakpointConfig {
    /// Returns the absolute address of the breakpoint.
    pub const fn resolve(&self, entry_point: u64) -> u64 {
        if self.from_entry {
            entry_point.wrapping_add(self.addr)
        } else {
            self.addr
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use test_log::test;

    use super::{BreakpointConfig, RunConfig};

    #[test]
    fn parse_from_kdl_defaults() {
        let config = knus::parse::<RunConfig>("<content>", "")
            .map_err(miette::Report::new)
            .expect("parse kdl");

        assert_eq!(
            config,
            RunConfig {
                entry_breakpoint: true,
                step_count: 1,
                floating_point: false,
                max_stops: 64,
                breakpoints: vec![],
            }
        );

        let config = knus::parse::<RunConfig>(
            "<content>",
            indoc::indoc! {r#"
                entry-breakpoint false
                step-count 3
                floating-point true
                max-stops 8
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            RunConfig {
                entry_breakpoint: false,
                step_count: 3,
                floating_point: true,
                max_stops: 8,
                breakpoints: vec![],
            }
        );
    }

    #[test]
    fn parse_from_kdl_with_breakpoints() {
        let config = knus::parse::<RunConfig>(
            "<content>",
            indoc::indoc! {r#"
                breakpoint 0x401000
                breakpoint 16 from-entry=true
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config.breakpoints,
            [
                BreakpointConfig {
                    addr: 0x401000,
                    from_entry: false,
                },
                BreakpointConfig {
                    addr: 16,
                    from_entry: true,
                },
            ]
        );

        assert_eq!(config.breakpoints[0].resolve(0x1000), 0x401000);
        assert_eq!(config.breakpoints[1].resolve(0x1000), 0x1010);
    }

    #[test]
    fn parse_from_kdl_rejects_bad_values() {
        assert!(knus::parse::<RunConfig>("<content>", "step-count -1").is_err());
        assert!(knus::parse::<RunConfig>("<content>", "breakpoint \"main\"").is_err());
    }
}
