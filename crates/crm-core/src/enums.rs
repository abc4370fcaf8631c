use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Declares a closed vocabulary stored and transmitted as snake_case text.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            #[must_use]
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    #[derive(Default)]
    pub enum DepartmentTier {
        Critical => "critical",
        #[default]
        Standard => "standard",
    }
}

string_enum! {
    #[derive(Default)]
    pub enum DepartmentStatus {
        #[default]
        Active => "active",
        Inactive => "inactive",
    }
}

string_enum! {
    #[derive(Default)]
    pub enum Environment {
        #[default]
        Prod => "prod",
        Test => "test",
    }
}

string_enum! {
    #[derive(Default)]
    pub enum ApplicationStatus {
        Live => "live",
        #[default]
        Integrating => "integrating",
        Deprecated => "deprecated",
    }
}

string_enum! {
    /// Onboarding stages in the order an application moves through them.
    #[derive(Default)]
    pub enum IntegrationStage {
        #[default]
        Intake => "intake",
        Design => "design",
        Implementation => "implementation",
        Testing => "testing",
        Production => "production",
    }
}

string_enum! {
    /// Delivery health of an integration, reported as its `status`.
    #[derive(Default)]
    pub enum IntegrationHealth {
        #[default]
        OnTrack => "on_track",
        Blocked => "blocked",
        Delayed => "delayed",
    }
}

string_enum! {
    #[derive(Default)]
    pub enum RiskLevel {
        #[default]
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

string_enum! {
    pub enum ContactRole {
        Business => "business",
        Technical => "technical",
        Security => "security",
    }
}

string_enum! {
    pub enum ActivityType {
        Meeting => "meeting",
        Email => "email",
        Workshop => "workshop",
        Incident => "incident",
    }
}

string_enum! {
    pub enum IncidentSeverity {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

string_enum! {
    #[derive(Default)]
    pub enum IncidentStatus {
        #[default]
        Open => "open",
        Investigating => "investigating",
        Resolved => "resolved",
        Closed => "closed",
    }
}

impl IncidentStatus {
    /// Resolved and closed incidents no longer count as open work.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}
