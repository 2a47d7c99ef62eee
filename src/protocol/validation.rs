//! Header checks run as soon as the first two octets of a frame arrive.
//!
//! The rules depend on the connection's role, its masking policy, whether a
//! per-message compression extension was negotiated, and whether a
//! fragmented message is in progress. Every failed rule is reported, in
//! order, so that a connection configured not to drop on the first
//! violation sees the same sequence of failures the peer caused.

use crate::connection::Role;
use crate::protocol::frame::HeaderPrefix;

/// RSV value marking a compressed message (RSV1).
pub const RSV_COMPRESSED: u8 = 4;

/// Role- and negotiation-aware frame header validator.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    require_masked_client_frames: bool,
    accept_masked_server_frames: bool,
    compression: Option<&'static str>,
}

impl FrameValidator {
    /// Validator for `role` with RFC masking rules and no extension.
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            require_masked_client_frames: true,
            accept_masked_server_frames: false,
            compression: None,
        }
    }

    /// Servers: reject unmasked frames from clients.
    #[must_use]
    pub const fn with_require_masked_client_frames(mut self, require: bool) -> Self {
        self.require_masked_client_frames = require;
        self
    }

    /// Clients: tolerate masked frames from servers.
    #[must_use]
    pub const fn with_accept_masked_server_frames(mut self, accept: bool) -> Self {
        self.accept_masked_server_frames = accept;
        self
    }

    /// Record the negotiated compression extension, enabling RSV1 on the
    /// first frame of data messages.
    pub fn set_compression(&mut self, extension: Option<&'static str>) {
        self.compression = extension;
    }

    /// Run all checks for a header prefix and return the violations found.
    #[must_use]
    pub fn check(&self, prefix: &HeaderPrefix, inside_message: bool) -> Vec<String> {
        let mut violations = Vec::new();

        if prefix.rsv != 0 && !(self.compression.is_some() && prefix.rsv == RSV_COMPRESSED) {
            violations.push(format!("RSV = {} and no extension negotiated", prefix.rsv));
        }

        match self.role {
            Role::Server if self.require_masked_client_frames && !prefix.masked => {
                violations.push("unmasked client-to-server frame".to_string());
            }
            Role::Client if !self.accept_masked_server_frames && prefix.masked => {
                violations.push("masked server-to-client frame".to_string());
            }
            _ => {}
        }

        if prefix.is_control() {
            if !prefix.fin {
                violations.push("fragmented control frame".to_string());
            }
            if prefix.len7 > 125 {
                violations.push("control frame with payload length > 125 octets".to_string());
            }
            if !matches!(prefix.opcode, 8..=10) {
                violations.push(format!(
                    "control frame using reserved opcode {}",
                    prefix.opcode
                ));
            }
            if prefix.opcode == 8 && prefix.len7 == 1 {
                violations.push("received close control frame with payload len 1".to_string());
            }
            if let Some(name) = self.compression {
                if prefix.rsv == RSV_COMPRESSED {
                    violations.push(format!("received compressed control frame [{name}]"));
                }
            }
        } else {
            if prefix.opcode > 2 {
                violations.push(format!("data frame using reserved opcode {}", prefix.opcode));
            }
            if !inside_message && prefix.opcode == 0 {
                violations.push(
                    "received continuation data frame outside fragmented message".to_string(),
                );
            }
            if inside_message && prefix.opcode != 0 {
                violations.push(
                    "received non-continuation data frame while inside fragmented message"
                        .to_string(),
                );
            }
            if let Some(name) = self.compression {
                if inside_message && prefix.rsv == RSV_COMPRESSED {
                    violations.push(format!(
                        "received continuation data frame with compress bit set [{name}]"
                    ));
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(b0: u8, b1: u8) -> HeaderPrefix {
        HeaderPrefix::parse(&[b0, b1]).unwrap()
    }

    // --------------------------------------------------------------------------
    // Masking rules
    // --------------------------------------------------------------------------

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let validator = FrameValidator::new(Role::Server);
        let violations = validator.check(&prefix(0x81, 0x05), false);
        assert_eq!(violations, vec!["unmasked client-to-server frame"]);
    }

    #[test]
    fn test_server_accepts_unmasked_when_configured() {
        let validator =
            FrameValidator::new(Role::Server).with_require_masked_client_frames(false);
        assert!(validator.check(&prefix(0x81, 0x05), false).is_empty());
    }

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Role::Client);
        let violations = validator.check(&prefix(0x81, 0x85), false);
        assert_eq!(violations, vec!["masked server-to-client frame"]);

        let lenient = FrameValidator::new(Role::Client).with_accept_masked_server_frames(true);
        assert!(lenient.check(&prefix(0x81, 0x85), false).is_empty());
    }

    // --------------------------------------------------------------------------
    // RSV bits
    // --------------------------------------------------------------------------

    #[test]
    fn test_rsv_without_extension() {
        let validator = FrameValidator::new(Role::Client);
        let violations = validator.check(&prefix(0xc1, 0x05), false);
        assert_eq!(violations, vec!["RSV = 4 and no extension negotiated"]);
    }

    #[test]
    fn test_rsv1_allowed_with_compression() {
        let mut validator = FrameValidator::new(Role::Client);
        validator.set_compression(Some("permessage-deflate"));
        assert!(validator.check(&prefix(0xc1, 0x05), false).is_empty());

        // RSV2 is still illegal.
        assert_eq!(validator.check(&prefix(0xa1, 0x05), false).len(), 1);
    }

    #[test]
    fn test_compressed_continuation_rejected() {
        let mut validator = FrameValidator::new(Role::Client);
        validator.set_compression(Some("permessage-deflate"));
        let violations = validator.check(&prefix(0xc0, 0x05), true);
        assert_eq!(
            violations,
            vec!["received continuation data frame with compress bit set [permessage-deflate]"]
        );
    }

    #[test]
    fn test_compressed_control_rejected() {
        let mut validator = FrameValidator::new(Role::Client);
        validator.set_compression(Some("permessage-deflate"));
        let violations = validator.check(&prefix(0xc9, 0x00), false);
        assert_eq!(
            violations,
            vec!["received compressed control frame [permessage-deflate]"]
        );
    }

    // --------------------------------------------------------------------------
    // Control frames
    // --------------------------------------------------------------------------

    #[test]
    fn test_control_frame_rules() {
        let validator = FrameValidator::new(Role::Client);
        assert_eq!(
            validator.check(&prefix(0x09, 0x00), false),
            vec!["fragmented control frame"]
        );
        assert_eq!(
            validator.check(&prefix(0x89, 126), false),
            vec!["control frame with payload length > 125 octets"]
        );
        assert_eq!(
            validator.check(&prefix(0x8b, 0x00), false),
            vec!["control frame using reserved opcode 11"]
        );
        assert_eq!(
            validator.check(&prefix(0x88, 0x01), false),
            vec!["received close control frame with payload len 1"]
        );
        assert!(validator.check(&prefix(0x89, 0x00), true).is_empty());
    }

    // --------------------------------------------------------------------------
    // Data frames and fragmentation
    // --------------------------------------------------------------------------

    #[test]
    fn test_data_frame_rules() {
        let validator = FrameValidator::new(Role::Client);
        assert_eq!(
            validator.check(&prefix(0x83, 0x00), false),
            vec!["data frame using reserved opcode 3"]
        );
        assert_eq!(
            validator.check(&prefix(0x80, 0x00), false),
            vec!["received continuation data frame outside fragmented message"]
        );
        assert_eq!(
            validator.check(&prefix(0x81, 0x00), true),
            vec!["received non-continuation data frame while inside fragmented message"]
        );
        assert!(validator.check(&prefix(0x80, 0x00), true).is_empty());
    }

    #[test]
    fn test_multiple_violations_reported_in_order() {
        let validator = FrameValidator::new(Role::Server);
        let violations = validator.check(&prefix(0x3b, 0x7e), false);
        assert_eq!(
            violations,
            vec![
                "RSV = 3 and no extension negotiated",
                "unmasked client-to-server frame",
                "fragmented control frame",
                "control frame with payload length > 125 octets",
                "control frame using reserved opcode 11",
            ]
        );
    }
}
