use bevy::log::warn;
use bevy::math::Vec3;
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::constraint::LinkLimits;
use crate::error::ConfigError;
use crate::types::{AttachPoint, CoupleMode, PeerRole};

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_physics_dt() -> f64 {
    0.02
}
const fn default_gravity() -> [f32; 3] {
    [0.0, 0.0, -9.81]
}
const fn default_break_force() -> f32 {
    2000.0
}
const fn default_break_torque() -> f32 {
    2000.0
}
const fn default_coupling_settle_steps() -> u32 {
    3
}
const fn default_decouple_check_steps() -> u32 {
    1
}
fn default_link_type() -> String {
    "generic".into()
}
fn default_attach_point() -> AttachPoint {
    AttachPoint::new("top", Vec3::ZERO, Vec3::Z)
}
const fn default_max_length() -> f32 {
    10.0
}
const fn default_motor_speed() -> f32 {
    0.5
}

// ---------------------------------------------------------------------------
// LinkageConfig
// ---------------------------------------------------------------------------

/// Session-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Resource)]
pub struct LinkageConfig {
    /// Physics timestep in seconds (default: 0.02 = 50 Hz).
    #[serde(default = "default_physics_dt")]
    pub physics_dt: f64,

    /// Gravity vector [x, y, z] in m/s^2.
    #[serde(default = "default_gravity")]
    pub gravity: [f32; 3],

    /// Break force used when neither the joint nor the bodies define one.
    #[serde(default = "default_break_force")]
    pub default_break_force: f32,

    /// Break torque used when neither the joint nor the bodies define one.
    #[serde(default = "default_break_torque")]
    pub default_break_torque: f32,

    /// Physics steps structural coupling needs before it can be verified.
    #[serde(default = "default_coupling_settle_steps")]
    pub coupling_settle_steps: u32,

    /// Physics steps to wait before verifying a decouple.
    #[serde(default = "default_decouple_check_steps")]
    pub decouple_check_steps: u32,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            physics_dt: default_physics_dt(),
            gravity: default_gravity(),
            default_break_force: default_break_force(),
            default_break_torque: default_break_torque(),
            coupling_settle_steps: default_coupling_settle_steps(),
            decouple_check_steps: default_decouple_check_steps(),
        }
    }
}

impl LinkageConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.physics_dt.is_finite() || self.physics_dt <= 0.0 {
            return Err(ConfigError::InvalidPhysicsDt(self.physics_dt));
        }
        if self.default_break_force.is_nan() || self.default_break_force <= 0.0 {
            return Err(invalid("default_break_force", "must be > 0"));
        }
        if self.default_break_torque.is_nan() || self.default_break_torque <= 0.0 {
            return Err(invalid("default_break_torque", "must be > 0"));
        }
        Ok(())
    }

    pub fn gravity_vec(&self) -> Vec3 {
        Vec3::from_array(self.gravity)
    }

    /// Physics timestep as `f32`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn dt(&self) -> f32 {
        self.physics_dt as f32
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// JointConfig
// ---------------------------------------------------------------------------

/// Kind of physical joint a source creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    /// Rigid strut: rope joint whose limits are both pinned to the link length.
    #[default]
    Strut,
    /// Flexible cable: rope joint limited by the deployed length.
    Cable,
}

/// Static joint configuration of a source peer.
///
/// A limit of 0 disables the check. A break force or torque of 0 is derived
/// from the linked bodies' strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    #[serde(default)]
    pub kind: JointKind,
    #[serde(default)]
    pub min_length: f32,
    #[serde(default = "default_max_length")]
    pub max_length: f32,
    #[serde(default)]
    pub break_force: f32,
    #[serde(default)]
    pub break_torque: f32,
    #[serde(default)]
    pub source_angle_limit: f32,
    #[serde(default)]
    pub target_angle_limit: f32,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            kind: JointKind::Strut,
            min_length: 0.0,
            max_length: default_max_length(),
            break_force: 0.0,
            break_torque: 0.0,
            source_angle_limit: 0.0,
            target_angle_limit: 0.0,
        }
    }
}

impl JointConfig {
    pub const fn limits(&self) -> LinkLimits {
        LinkLimits {
            min_length: self.min_length,
            max_length: self.max_length,
            source_angle_limit: self.source_angle_limit,
            target_angle_limit: self.target_angle_limit,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("joint.min_length", self.min_length),
            ("joint.max_length", self.max_length),
            ("joint.break_force", self.break_force),
            ("joint.break_torque", self.break_torque),
            ("joint.source_angle_limit", self.source_angle_limit),
            ("joint.target_angle_limit", self.target_angle_limit),
        ];
        for (field, value) in non_negative {
            if value < 0.0 || !value.is_finite() {
                return Err(invalid(field, "must be a finite value >= 0"));
            }
        }
        if self.max_length > 0.0 && self.min_length > self.max_length {
            return Err(invalid("joint.min_length", "must not exceed max_length"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CableConfig
// ---------------------------------------------------------------------------

/// Winch settings of a cable-carrying source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableConfig {
    /// Longest cable the winch can deploy, in meters.
    #[serde(default = "default_max_length")]
    pub max_length: f32,
    /// Deployed length at spawn.
    #[serde(default)]
    pub deployed_length: f32,
    /// Winch speed in m/s.
    #[serde(default = "default_motor_speed")]
    pub motor_speed: f32,
}

impl Default for CableConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            deployed_length: 0.0,
            motor_speed: default_motor_speed(),
        }
    }
}

// ---------------------------------------------------------------------------
// PeerConfig
// ---------------------------------------------------------------------------

/// Spawn-time settings of one link peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub role: PeerRole,
    /// Only peers with equal link types can link.
    #[serde(default = "default_link_type")]
    pub link_type: String,
    #[serde(default = "default_attach_point")]
    pub attach_point: AttachPoint,
    #[serde(default)]
    pub couple_mode: CoupleMode,
    /// Whether this peer's body may be structurally merged by a link.
    #[serde(default)]
    pub allow_coupling: bool,
    /// Name of the renderer collaborator registered on the body.
    #[serde(default)]
    pub renderer_name: Option<String>,
    /// Joint settings. Only meaningful for sources.
    #[serde(default)]
    pub joint: Option<JointConfig>,
    #[serde(default)]
    pub cable: Option<CableConfig>,
}

impl PeerConfig {
    pub fn source(link_type: impl Into<String>, attach_point: AttachPoint) -> Self {
        Self {
            role: PeerRole::Source,
            link_type: link_type.into(),
            attach_point,
            couple_mode: CoupleMode::default(),
            allow_coupling: false,
            renderer_name: None,
            joint: Some(JointConfig::default()),
            cable: None,
        }
    }

    pub fn target(link_type: impl Into<String>, attach_point: AttachPoint) -> Self {
        Self {
            role: PeerRole::Target,
            link_type: link_type.into(),
            attach_point,
            couple_mode: CoupleMode::default(),
            allow_coupling: false,
            renderer_name: None,
            joint: None,
            cable: None,
        }
    }

    #[must_use]
    pub fn with_couple_mode(mut self, mode: CoupleMode) -> Self {
        self.couple_mode = mode;
        self
    }

    #[must_use]
    pub fn with_allow_coupling(mut self, allow: bool) -> Self {
        self.allow_coupling = allow;
        self
    }

    #[must_use]
    pub fn with_joint(mut self, joint: JointConfig) -> Self {
        self.joint = Some(joint);
        self
    }

    #[must_use]
    pub fn with_cable(mut self, cable: CableConfig) -> Self {
        self.cable = Some(cable);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, name: impl Into<String>) -> Self {
        self.renderer_name = Some(name.into());
        self
    }

    /// Correct inconsistent settings in place.
    ///
    /// Returns the warnings that were logged for each correction.
    pub fn fix_consistency(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.couple_mode == CoupleMode::AlwaysCoupled && !self.allow_coupling {
            self.allow_coupling = true;
            warnings.push(format!(
                "Inconsistent setting fixed on {}: couple_mode=AlwaysCoupled, allow_coupling=false => true",
                self.attach_point.id
            ));
        }
        if self.role == PeerRole::Target && self.joint.is_some() {
            self.joint = None;
            warnings.push(format!(
                "Inconsistent setting fixed on {}: targets do not own joints",
                self.attach_point.id
            ));
        }
        if let Some(cable) = self.cable.as_mut() {
            let clamped = cable.deployed_length.clamp(0.0, cable.max_length.max(0.0));
            if (clamped - cable.deployed_length).abs() > f32::EPSILON {
                warnings.push(format!(
                    "Inconsistent setting fixed on {}: deployed_length {:.2} => {:.2}",
                    self.attach_point.id, cable.deployed_length, clamped
                ));
                cable.deployed_length = clamped;
            }
        }
        for message in &warnings {
            warn!("{message}");
        }
        warnings
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link_type.is_empty() {
            return Err(invalid("link_type", "must not be empty"));
        }
        if self.attach_point.id.is_empty() {
            return Err(invalid("attach_point.id", "must not be empty"));
        }
        if let Some(joint) = &self.joint {
            joint.validate()?;
        }
        if let Some(cable) = &self.cable {
            if cable.max_length <= 0.0 {
                return Err(invalid("cable.max_length", "must be > 0"));
            }
            if cable.motor_speed < 0.0 {
                return Err(invalid("cable.motor_speed", "must be >= 0"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkage_config_default_values() {
        let config = LinkageConfig::default();
        assert!((config.physics_dt - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.gravity, [0.0, 0.0, -9.81]);
        assert_eq!(config.coupling_settle_steps, 3);
        assert_eq!(config.decouple_check_steps, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn linkage_config_invalid_physics_dt() {
        let config = LinkageConfig {
            physics_dt: 0.0,
            ..LinkageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPhysicsDt(_))
        ));
    }

    #[test]
    fn linkage_config_invalid_break_force() {
        let config = LinkageConfig {
            default_break_force: -1.0,
            ..LinkageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn linkage_config_rejects_non_finite_values() {
        for physics_dt in [f64::NAN, f64::INFINITY] {
            let config = LinkageConfig {
                physics_dt,
                ..LinkageConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidPhysicsDt(_))
            ));
        }
        let config = LinkageConfig {
            default_break_force: f32::NAN,
            ..LinkageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn linkage_config_from_partial_toml() {
        let config = LinkageConfig::from_toml_str("physics_dt = 0.01\ncoupling_settle_steps = 5\n")
            .unwrap();
        assert!((config.physics_dt - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.coupling_settle_steps, 5);
        assert_eq!(config.gravity, [0.0, 0.0, -9.81]);
    }

    #[test]
    fn linkage_config_from_toml_rejects_invalid() {
        let err = LinkageConfig::from_toml_str("physics_dt = -0.5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPhysicsDt(_)));
        let err = LinkageConfig::from_toml_str("physics_dt = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn linkage_config_from_missing_file() {
        let err = LinkageConfig::from_file("/nonexistent/linkage.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn peer_config_from_toml() {
        let text = r#"
            role = "source"
            link_type = "tow"
            couple_mode = "always_coupled"
            allow_coupling = true

            [attach_point]
            id = "hitch"
            position = [0.0, 0.0, -0.5]
            normal = [0.0, 0.0, -1.0]

            [joint]
            kind = "cable"
            max_length = 25.0
            source_angle_limit = 60.0
        "#;
        let config: PeerConfig = toml::from_str(text).unwrap();
        assert_eq!(config.role, PeerRole::Source);
        assert_eq!(config.couple_mode, CoupleMode::AlwaysCoupled);
        assert_eq!(config.attach_point.id, "hitch");
        let joint = config.joint.unwrap();
        assert_eq!(joint.kind, JointKind::Cable);
        assert!((joint.max_length - 25.0).abs() < f32::EPSILON);
        assert!(joint.min_length.abs() < f32::EPSILON);
    }

    #[test]
    fn fix_consistency_enables_coupling() {
        let mut config = PeerConfig::source("tow", default_attach_point())
            .with_couple_mode(CoupleMode::AlwaysCoupled);
        let warnings = config.fix_consistency();
        assert_eq!(warnings.len(), 1);
        assert!(config.allow_coupling);
        assert!(config.fix_consistency().is_empty());
    }

    #[test]
    fn fix_consistency_strips_target_joint() {
        let mut config =
            PeerConfig::target("tow", default_attach_point()).with_joint(JointConfig::default());
        config.fix_consistency();
        assert!(config.joint.is_none());
    }

    #[test]
    fn fix_consistency_clamps_deployed_cable() {
        let mut config = PeerConfig::source("tow", default_attach_point()).with_cable(CableConfig {
            max_length: 5.0,
            deployed_length: 8.0,
            motor_speed: 1.0,
        });
        config.fix_consistency();
        let cable = config.cable.unwrap();
        assert!((cable.deployed_length - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn joint_config_validation() {
        let joint = JointConfig {
            min_length: 5.0,
            max_length: 2.0,
            ..JointConfig::default()
        };
        assert!(joint.validate().is_err());
        let joint = JointConfig {
            min_length: 5.0,
            max_length: 0.0,
            ..JointConfig::default()
        };
        assert!(joint.validate().is_ok());
    }

    #[test]
    fn peer_config_validation() {
        let config = PeerConfig::source("", default_attach_point());
        assert!(config.validate().is_err());
        let config = PeerConfig::source("tow", default_attach_point());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn joint_limits_mirror_config() {
        let joint = JointConfig {
            min_length: 1.0,
            max_length: 4.0,
            source_angle_limit: 30.0,
            target_angle_limit: 45.0,
            ..JointConfig::default()
        };
        let limits = joint.limits();
        assert!((limits.min_length - 1.0).abs() < f32::EPSILON);
        assert!((limits.target_angle_limit - 45.0).abs() < f32::EPSILON);
    }
}
