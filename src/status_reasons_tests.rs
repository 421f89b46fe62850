// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons` module

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_istio_condition_type_for_components() {
        assert_eq!(
            istio_condition_type("ActiveGate"),
            "IstioServiceConfigurationForActiveGate"
        );
        assert_eq!(
            istio_condition_type("OneAgent"),
            "IstioServiceConfigurationForOneAgent"
        );
    }

    #[test]
    fn test_istio_reasons() {
        assert_eq!(
            istio_reason("OneAgent", REASON_ISTIO_CHANGED_SUFFIX),
            "IstioServiceConfigurationForOneAgentChanged"
        );
        assert_eq!(
            istio_reason("ActiveGate", REASON_ISTIO_FAILED_SUFFIX),
            "IstioServiceConfigurationForActiveGateFailed"
        );
    }

    #[test]
    fn test_version_condition_type() {
        assert_eq!(version_condition_type("OneAgent"), "OneAgentVersion");
        assert_eq!(version_condition_type("CodeModules"), "CodeModulesVersion");
    }

    #[test]
    fn test_token_reasons() {
        assert_eq!(REASON_TOKEN_READY, "TokenReady");
        assert_eq!(REASON_TOKEN_ERROR, "TokenError");
        assert_eq!(CONDITION_TYPE_TOKENS, "Tokens");
    }
}
