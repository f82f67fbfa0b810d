use codebox_core::{
    Error, Language, Result, RiskLevel, SecurityResult, SecurityViolation, Severity,
    ViolationKind,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::policy::{LanguagePolicy, SecurityPolicy};
use crate::python;
use crate::restrictions::{self, ContainerSpec};

/// Rules of one language with every regular expression compiled once.
struct CompiledRules {
    forbidden_patterns: Vec<(String, Regex)>,
    suspicious_patterns: Vec<(String, Regex)>,
    /// `\bname\b` presence checks (JavaScript) or call checks in f-strings (Python).
    functions: Vec<(String, Regex)>,
    /// `require`/`import` of a forbidden module (JavaScript).
    module_imports: Vec<(String, Regex)>,
    commands: Vec<(String, Severity, Regex)>,
}

fn compile(pattern: &str, language: Language) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(%language, pattern, error = %e, "Skipping invalid policy pattern");
            None
        }
    }
}

impl CompiledRules {
    fn new(language: Language, policy: &LanguagePolicy) -> Self {
        let forbidden_patterns = policy
            .forbidden_patterns
            .iter()
            .filter_map(|p| compile(p, language).map(|re| (p.clone(), re)))
            .collect();

        let suspicious_patterns = policy
            .suspicious_patterns
            .iter()
            .filter_map(|p| compile(&p.pattern, language).map(|re| (p.description.clone(), re)))
            .collect();

        let functions = policy
            .forbidden_functions
            .iter()
            .filter_map(|name| {
                let pattern = match language {
                    Language::Python => format!(r"\b{}\s*\(", regex::escape(name)),
                    _ => format!(r"\b{}\b", regex::escape(name)),
                };
                compile(&pattern, language).map(|re| (name.clone(), re))
            })
            .collect();

        let module_imports = if language == Language::JavaScript {
            policy
                .forbidden_imports
                .iter()
                .filter_map(|name| {
                    let pattern = format!(
                        r#"(?:require\s*\(\s*|import\s*\(\s*|from\s+|import\s+)['"](?:node:)?{}(?:/[^'"]*)?['"]"#,
                        regex::escape(name)
                    );
                    compile(&pattern, language).map(|re| (name.clone(), re))
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut commands: Vec<(String, Severity, Regex)> = Vec::new();
        let listed = policy
            .critical_commands
            .iter()
            .map(|c| (c, Severity::Critical))
            .chain(policy.forbidden_commands.iter().map(|c| (c, Severity::High)));
        for (command, severity) in listed {
            if commands.iter().any(|(c, _, _)| c == command) {
                continue;
            }
            let pattern = format!(r"\b{}\b", regex::escape(command));
            if let Some(re) = compile(&pattern, language) {
                commands.push((command.clone(), severity, re));
            }
        }

        Self {
            forbidden_patterns,
            suspicious_patterns,
            functions,
            module_imports,
            commands,
        }
    }
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].matches('\n').count() + 1
}

/// Combine violation severities into one risk level.
pub fn aggregate_risk(violations: &[SecurityViolation]) -> RiskLevel {
    let count = |s: Severity| violations.iter().filter(|v| v.severity == s).count();
    let (critical, high, medium) = (
        count(Severity::Critical),
        count(Severity::High),
        count(Severity::Medium),
    );

    if critical > 0 || high > 3 {
        RiskLevel::Critical
    } else if high > 0 || medium > 5 {
        RiskLevel::High
    } else if medium > 0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn recommendation_for(kind: ViolationKind) -> &'static str {
    match kind {
        ViolationKind::ForbiddenImport => {
            "Remove imports of restricted modules; only computation modules are available"
        }
        ViolationKind::ForbiddenFunction => {
            "Avoid dynamic evaluation, introspection and file access functions"
        }
        ViolationKind::ForbiddenPattern => {
            "Remove constructs that reach outside the sandbox or chain commands"
        }
        ViolationKind::SuspiciousPattern => {
            "Network and persistent storage APIs are unavailable inside the sandbox"
        }
        ViolationKind::SyntaxError => "Fix the syntax error before submitting the code",
    }
}

/// Policy-driven static analysis of guest code.
pub struct SecurityValidator {
    policy: Arc<SecurityPolicy>,
    rules: HashMap<Language, CompiledRules>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(Arc::new(SecurityPolicy::default()))
    }
}

impl SecurityValidator {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        let rules = Language::ALL
            .iter()
            .map(|&l| (l, CompiledRules::new(l, policy.language(l))))
            .collect();
        Self { policy, rules }
    }

    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    /// Enumerate every violation in `code` for a language tag.
    ///
    /// Unsupported tags are rejected with HIGH risk instead of an error.
    pub fn validate_comprehensive(&self, code: &str, language: &str) -> SecurityResult {
        match language.parse::<Language>() {
            Ok(language) => self.validate_language(code, language),
            Err(_) => SecurityResult::rejected(
                SecurityViolation::new(
                    ViolationKind::ForbiddenPattern,
                    Severity::High,
                    format!("Unsupported language: {}", language),
                ),
                "Submit code in python, javascript or shell",
            ),
        }
    }

    /// Validate and fail with `ValidationDenied` when the code is unsafe.
    pub fn validate(&self, code: &str, language: &str) -> Result<SecurityResult> {
        let result = self.validate_comprehensive(code, language);
        if result.is_safe {
            return Ok(result);
        }
        let reason = result
            .most_severe()
            .map(|v| v.description.clone())
            .unwrap_or_else(|| result.summary());
        Err(Error::validation_denied(reason))
    }

    pub fn validate_language(&self, code: &str, language: Language) -> SecurityResult {
        if code.trim().is_empty() {
            return SecurityResult::rejected(
                SecurityViolation::new(
                    ViolationKind::SyntaxError,
                    Severity::High,
                    "Empty code submitted",
                ),
                "Submit non-empty source code",
            );
        }

        let Some(rules) = self.rules.get(&language) else {
            return SecurityResult::rejected(
                SecurityViolation::new(
                    ViolationKind::ForbiddenPattern,
                    Severity::High,
                    format!("No security rules loaded for {}", language),
                ),
                "Submit code in a supported language",
            );
        };
        let policy = self.policy.language(language);

        let mut violations = Vec::new();
        self.check_patterns(code, rules, &mut violations);
        match language {
            Language::Python => self.check_python(code, policy, rules, &mut violations),
            Language::JavaScript => self.check_javascript(code, rules, &mut violations),
            Language::Shell => self.check_shell(code, rules, &mut violations),
        }
        self.check_suspicious(code, rules, &mut violations);

        let risk_level = aggregate_risk(&violations);
        let mut recommendations: Vec<String> = Vec::new();
        for v in &violations {
            let rec = v
                .recommendation
                .clone()
                .unwrap_or_else(|| recommendation_for(v.kind).to_string());
            if !recommendations.contains(&rec) {
                recommendations.push(rec);
            }
        }

        let result = SecurityResult {
            is_safe: matches!(risk_level, RiskLevel::Low | RiskLevel::Medium),
            risk_level,
            violations,
            recommendations,
        };

        tracing::debug!(
            %language,
            risk = risk_level.as_str(),
            violations = result.violations.len(),
            "Validated code"
        );
        result
    }

    /// Restrict a run spec according to the language's resource policy.
    pub fn apply_restrictions(&self, base: ContainerSpec, language: Language) -> ContainerSpec {
        restrictions::apply_restrictions(base, language, &self.policy)
    }

    // ===== Checks =====

    fn check_patterns(&self, code: &str, rules: &CompiledRules, out: &mut Vec<SecurityViolation>) {
        for (_, re) in &rules.forbidden_patterns {
            if let Some(m) = re.find(code) {
                let snippet = m.as_str().trim();
                out.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenPattern,
                        Severity::High,
                        format!("Forbidden pattern: {}", snippet),
                    )
                    .at_line(line_of(code, m.start())),
                );
            }
        }
    }

    fn check_suspicious(&self, code: &str, rules: &CompiledRules, out: &mut Vec<SecurityViolation>) {
        for (description, re) in &rules.suspicious_patterns {
            if let Some(m) = re.find(code) {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::SuspiciousPattern,
                        Severity::Medium,
                        format!("{}: {}", description, m.as_str()),
                    )
                    .at_line(line_of(code, m.start())),
                );
            }
        }
    }

    fn check_python(
        &self,
        code: &str,
        policy: &LanguagePolicy,
        rules: &CompiledRules,
        out: &mut Vec<SecurityViolation>,
    ) {
        let scan = match python::scan(code) {
            Ok(scan) => scan,
            Err(e) => {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::SyntaxError,
                        Severity::High,
                        format!("Syntax error: {}", e.message),
                    )
                    .at(e.line, e.column),
                );
                return;
            }
        };

        for import in &scan.imports {
            let forbidden = policy
                .forbidden_imports
                .iter()
                .any(|f| f == &import.module || f == import.top_level());
            if forbidden {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenImport,
                        Severity::High,
                        format!("Forbidden import: {}", import.module),
                    )
                    .at(import.line, import.column),
                );
            }
        }

        for call in &scan.calls {
            if policy.forbidden_functions.contains(&call.name) {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenFunction,
                        Severity::High,
                        format!("Forbidden function call: {}", call.name),
                    )
                    .at(call.line, call.column),
                );
            }
        }

        for expr in &scan.fstring_exprs {
            for (name, re) in &rules.functions {
                if re.is_match(&expr.text) {
                    out.push(
                        SecurityViolation::new(
                            ViolationKind::ForbiddenFunction,
                            Severity::High,
                            format!("Forbidden function call: {}", name),
                        )
                        .at_line(expr.line),
                    );
                }
            }
        }
    }

    fn check_javascript(&self, code: &str, rules: &CompiledRules, out: &mut Vec<SecurityViolation>) {
        for (module, re) in &rules.module_imports {
            if let Some(m) = re.find(code) {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenImport,
                        Severity::High,
                        format!("Forbidden import: {}", module),
                    )
                    .at_line(line_of(code, m.start())),
                );
            }
        }

        for (name, re) in &rules.functions {
            if let Some(m) = re.find(code) {
                out.push(
                    SecurityViolation::new(
                        ViolationKind::ForbiddenFunction,
                        Severity::High,
                        format!("Forbidden function: {}", name),
                    )
                    .at_line(line_of(code, m.start())),
                );
            }
        }
    }

    fn check_shell(&self, code: &str, rules: &CompiledRules, out: &mut Vec<SecurityViolation>) {
        for (command, severity, re) in &rules.commands {
            if let Some(m) = re.find(code) {
                let violation = SecurityViolation::new(
                    ViolationKind::ForbiddenPattern,
                    *severity,
                    format!("Forbidden command: {}", command),
                )
                .at_line(line_of(code, m.start()));
                let violation = if *severity == Severity::Critical {
                    violation.with_recommendation(
                        "Privileged and destructive commands are never permitted",
                    )
                } else {
                    violation
                };
                out.push(violation);
            }
        }
    }
}
