//! Validator tests across every guest language.

use std::sync::Arc;

use codebox_core::{Error, Language, RiskLevel, Severity, ViolationKind};
use codebox_security::{SecurityPolicy, SecurityValidator};

fn validator() -> SecurityValidator {
    SecurityValidator::new(Arc::new(SecurityPolicy::default()))
}

fn kinds(code: &str, language: &str) -> Vec<ViolationKind> {
    validator()
        .validate_comprehensive(code, language)
        .violations
        .iter()
        .map(|v| v.kind)
        .collect()
}

// =============================================================================
// Common
// =============================================================================

#[test]
fn test_empty_code_is_rejected_for_every_language() {
    let validator = validator();
    for language in ["python", "javascript", "shell"] {
        for code in ["", "   ", "\n\t\n"] {
            let result = validator.validate_comprehensive(code, language);
            assert!(!result.is_safe, "{language} accepted empty code");
            assert_eq!(result.risk_level, RiskLevel::High);
        }
    }
}

#[test]
fn test_unsupported_language_is_rejected() {
    let result = validator().validate_comprehensive("print(1)", "cobol");
    assert!(!result.is_safe);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert!(result.violations[0].description.contains("cobol"));
}

#[test]
fn test_validate_returns_denial_with_most_severe_violation() {
    let err = validator()
        .validate("import subprocess\nsubprocess.run(['ls'])\n", "python")
        .unwrap_err();
    match err {
        Error::ValidationDenied(reason) => assert!(reason.contains("subprocess")),
        other => panic!("unexpected error: {other:?}"),
    }

    let ok = validator().validate("print(sum(range(10)))\n", "py").unwrap();
    assert!(ok.is_safe);
    assert_eq!(ok.risk_level, RiskLevel::Low);
}

#[test]
fn test_recommendations_are_deduplicated_per_kind() {
    let result = validator().validate_comprehensive("import os\nimport sys\nimport socket\n", "python");
    assert_eq!(result.violations.len(), 3);
    assert_eq!(result.recommendations.len(), 1);
}

// =============================================================================
// Python
// =============================================================================

#[test]
fn test_python_forbidden_imports() {
    let result = validator().validate_comprehensive("import os\nos.system('rm -rf /')\n", "python");
    assert!(!result.is_safe);
    assert!(result
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::ForbiddenImport && v.description.contains("os")));
    assert!(result.summary().contains("Forbidden import: os"));

    assert!(kinds("from os.path import join\n", "python").contains(&ViolationKind::ForbiddenImport));
    assert!(kinds("import urllib.request as r\n", "python").contains(&ViolationKind::ForbiddenImport));
}

#[test]
fn test_python_safe_modules_pass() {
    let code = "import math\nfrom collections import Counter\nprint(math.sqrt(16), Counter('aab'))\n";
    let result = validator().validate_comprehensive(code, "python");
    assert!(result.is_safe, "{:?}", result.violations);
    assert!(result.violations.is_empty());
}

#[test]
fn test_python_forbidden_calls_have_positions() {
    let result = validator().validate_comprehensive("x = 1\ny = eval('x + 1')\n", "python");
    let v = &result.violations[0];
    assert_eq!(v.kind, ViolationKind::ForbiddenFunction);
    assert_eq!((v.line, v.column), (Some(2), Some(5)));
}

#[test]
fn test_python_method_named_like_builtin_is_allowed() {
    let result = validator().validate_comprehensive("import re\nprint(re.compile('a+').match('aa'))\n", "python");
    assert!(result.is_safe, "{:?}", result.violations);
}

#[test]
fn test_python_calls_inside_strings_are_ignored_but_fstrings_are_checked() {
    assert!(validator()
        .validate_comprehensive("print('eval(1) is not called here')\n", "python")
        .is_safe);
    assert!(kinds("print(f\"{eval('1')}\")\n", "python").contains(&ViolationKind::ForbiddenFunction));
}

#[test]
fn test_python_dunder_escape_is_forbidden() {
    let result = validator().validate_comprehensive("print(().__class__.__bases__[0].__subclasses__())\n", "python");
    assert!(!result.is_safe);
    assert!(result
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::ForbiddenPattern));
}

#[test]
fn test_python_syntax_error_reports_line_and_column() {
    let result = validator().validate_comprehensive("print('ok')\nprint(\"unterminated)\n", "python");
    assert!(!result.is_safe);
    let v = &result.violations[0];
    assert_eq!(v.kind, ViolationKind::SyntaxError);
    assert_eq!(v.severity, Severity::High);
    assert_eq!(v.line, Some(2));
    assert_eq!(v.column, Some(7));
}

// =============================================================================
// JavaScript
// =============================================================================

#[test]
fn test_javascript_forbidden_modules() {
    for code in [
        "const cp = require('child_process');",
        "const fs = require(\"node:fs\");",
        "import { readFile } from 'fs/promises';",
        "const m = await import('net');",
    ] {
        assert!(
            kinds(code, "javascript").contains(&ViolationKind::ForbiddenImport),
            "{code}"
        );
    }
}

#[test]
fn test_javascript_forbidden_functions() {
    assert!(kinds("eval('1 + 1')", "js").contains(&ViolationKind::ForbiddenFunction));
    assert!(kinds("const f = new Function('return 1');", "js").contains(&ViolationKind::ForbiddenFunction));
    assert!(validator()
        .validate_comprehensive("const evaluate = (x) => x * 2;\nconsole.log(evaluate(2));", "js")
        .is_safe);
}

#[test]
fn test_javascript_suspicious_patterns_are_medium() {
    let result = validator().validate_comprehensive("fetch('https://example.com');\nlocalStorage.setItem('a', 1);", "javascript");
    assert!(result.is_safe);
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert_eq!(result.violations.len(), 2);
    assert!(result
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::SuspiciousPattern && v.severity == Severity::Medium));
}

#[test]
fn test_javascript_prototype_tampering() {
    let result = validator().validate_comprehensive("({}).__proto__.polluted = true;", "javascript");
    assert!(!result.is_safe);
}

// =============================================================================
// Shell
// =============================================================================

#[test]
fn test_shell_destructive_command_is_critical() {
    let result = validator().validate_comprehensive("rm -rf /", "shell");
    assert!(!result.is_safe);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert!(result
        .violations
        .iter()
        .any(|v| v.severity == Severity::Critical && v.description.contains("rm")));
}

#[test]
fn test_shell_network_command_is_high() {
    let result = validator().validate_comprehensive("curl http://example.com", "bash");
    assert_eq!(result.risk_level, RiskLevel::High);
}

#[test]
fn test_shell_control_operators() {
    for code in [
        "echo hi > /tmp/out",
        "echo hi >> log.txt",
        "cat script | sh",
        "echo a; echo b",
        "true && echo b",
        "echo $(whoami)",
        "echo `id`",
        "echo hi 1>/tmp/x",
        "ls 2>err.txt",
        "echo hi 1>>log.txt",
        "echo hi >&out.txt",
        "echo hi >&2x",
    ] {
        let result = validator().validate_comprehensive(code, "shell");
        assert!(!result.is_safe, "{code} was accepted");
    }
}

#[test]
fn test_shell_simple_script_passes() {
    let result =
        validator().validate_comprehensive("echo hello\nseq 1 3\nls 2>&1\necho oops >&2\n", "shell");
    assert!(result.is_safe, "{:?}", result.violations);
    assert_eq!(result.risk_level, RiskLevel::Low);
}

#[test]
fn test_validate_language_matches_tag_variant() {
    let v = validator();
    let typed = v.validate_language("echo hi", Language::Shell);
    let tagged = v.validate_comprehensive("echo hi", "sh");
    assert_eq!(typed, tagged);
}
