//! The typed manifest model.
//!
//! A manifest is one YAML mapping. Its reserved keys (`info`, `contacts`,
//! `registries`, and the fields of the default demand block) are structural;
//! every other top-level key is a selector — a media query naming the hosts
//! its demand block applies to:
//!
//! ```yaml
//! info:
//!   id: tools/cmake
//!   version: 3.28.1
//! requires:
//!   compilers/ninja: ^1.11
//! install:
//!   unzip: https://example.org/cmake-3.28.1.zip
//!   sha256: 9c1e...
//! windows and x64:
//!   exports:
//!     tools:
//!       cmake: bin/cmake.exe
//! ```
//!
//! Parsing walks the raw [`serde_yaml::Value`] tree instead of deriving
//! `Deserialize`, because shape defects must be *collected* (and the healthy
//! rest of the document kept) rather than aborting at the first problem.

use serde_yaml::Value;
use thiserror::Error;

use crate::coerce;
use crate::error::{ErrorKind, ValidationError};
use crate::expr::Expression;
use crate::installer::Installer;
use crate::query::Query;

/// Top-level keys that are never treated as block selectors.
const RESERVED: [&str; 7] = [
    "info",
    "contacts",
    "error",
    "message",
    "warning",
    "requires",
    "see-also",
];

/// Structural keys of the default demand block and the document itself.
const STRUCTURAL: [&str; 6] = [
    "registries",
    "install",
    "exports",
    "settings",
    "apply",
    "unless",
];

/// Failure to build any model at all from a document.
///
/// Shape defects inside an otherwise well-formed document do not land here;
/// they are collected into [`Manifest::diagnostics`].
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The text is not parseable YAML.
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The document root is not a mapping.
    #[error("manifest is not a yaml mapping")]
    NotAMapping,
    /// The `info` block is missing or lacks `id`/`version`.
    #[error("manifest has no usable info block: {0}")]
    MissingInfo(String),
}

/// Artifact identity metadata from the `info` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    /// Registry-relative artifact id, e.g. `tools/cmake`.
    pub id: String,
    /// Version string as declared.
    pub version: String,
    /// One-line summary, if declared.
    pub summary: Option<String>,
}

/// One registry declaration from the `registries` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryDecl {
    /// Name dependencies use as their qualifier prefix.
    pub name: String,
    /// Registry kind; only `artifact` registries are recognized.
    pub kind: String,
    /// Candidate locations for the registry data.
    pub location: Vec<String>,
}

/// The export bundle of a demand block: environment contributions applied
/// when the block's artifact is activated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Scalar defines, last write wins across artifacts.
    pub defines: Vec<(String, String)>,
    /// Path-like keys mapping to glob patterns over the installed tree.
    pub paths: Vec<(String, Vec<String>)>,
    /// Tool names mapping to a single install-relative path.
    pub tools: Vec<(String, String)>,
    /// Environment variables accumulating values per key.
    pub variables: Vec<(String, Vec<String>)>,
    /// Shell aliases exposed to the user.
    pub aliases: Vec<(String, String)>,
    /// Published locations (install-relative paths by name).
    pub locations: Vec<(String, String)>,
    /// Arbitrary properties accumulating values per key.
    pub properties: Vec<(String, Vec<String>)>,
}

impl Settings {
    fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Mapping(map)) = value else {
            return Self::default();
        };
        Self {
            defines: coerce::string_map(coerce::get(map, "defines")),
            paths: coerce::string_list_map(coerce::get(map, "paths")),
            tools: coerce::string_map(coerce::get(map, "tools")),
            variables: coerce::string_list_map(
                coerce::get(map, "variables").or_else(|| coerce::get(map, "environment")),
            ),
            aliases: coerce::string_map(coerce::get(map, "aliases")),
            locations: coerce::string_map(coerce::get(map, "locations")),
            properties: coerce::string_list_map(coerce::get(map, "properties")),
        }
    }

    /// True when the bundle contributes nothing.
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
            && self.paths.is_empty()
            && self.tools.is_empty()
            && self.variables.is_empty()
            && self.aliases.is_empty()
            && self.locations.is_empty()
            && self.properties.is_empty()
    }
}

/// A probe specification that can substitute an entire alternate
/// instruction set when an externally installed tool satisfies it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unless {
    /// Search roots; host variables are expanded before probing.
    pub from: Vec<String>,
    /// Candidate binary names relative to each root.
    pub where_: Vec<String>,
    /// Command template to run against a found candidate; `$0` is the path.
    pub run: Option<String>,
    /// `/pattern/flags` regex applied to the probe output.
    pub select: Option<String>,
    /// Raw `is` condition text as declared.
    pub matches_text: Option<String>,
    /// Parsed `is` condition; `None` when undeclared or invalid.
    pub matches: Option<Expression>,
    /// The alternate instruction set used when the probe succeeds.
    pub block: Box<DemandBlock>,
}

/// A bundle of conditionally applicable installation and activation
/// instructions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandBlock {
    /// Fatal precondition message; a non-empty value blocks installation.
    pub error: Option<String>,
    /// Reported but never blocking.
    pub warning: Option<String>,
    /// Informational message for the user.
    pub message: Option<String>,
    /// Ordered `(id, version range)` dependency requests.
    pub requires: Vec<(String, String)>,
    /// Related artifacts, reported only.
    pub see_also: Vec<(String, String)>,
    /// Classified installer entries in declaration order.
    pub install: Vec<Installer>,
    /// Environment contributions.
    pub settings: Settings,
    /// Optional probe-driven alternate instruction set.
    pub unless: Option<Unless>,
}

impl DemandBlock {
    fn from_mapping(
        map: &serde_yaml::Mapping,
        context: &str,
        allow_unless: bool,
        diagnostics: &mut Vec<ValidationError>,
    ) -> Self {
        let mut install = Vec::new();
        match coerce::get(map, "install") {
            Some(Value::Sequence(entries)) => {
                for entry in entries {
                    match Installer::classify(entry) {
                        Ok(installer) => install.push(installer),
                        Err(err) => diagnostics.push(err),
                    }
                }
            }
            Some(node) => match Installer::classify(node) {
                Ok(installer) => install.push(installer),
                Err(err) => diagnostics.push(err),
            },
            None => {}
        }

        let unless = match coerce::get(map, "unless") {
            Some(Value::Mapping(inner)) => {
                if allow_unless {
                    Some(Unless::from_mapping(inner, context, diagnostics))
                } else {
                    diagnostics.push(ValidationError::new(
                        ErrorKind::InvalidDefinition,
                        format!("'{context}': an unless block may not contain another unless"),
                    ));
                    None
                }
            }
            Some(_) => {
                diagnostics.push(ValidationError::new(
                    ErrorKind::IncorrectType,
                    format!("'{context}': unless is not an object"),
                ));
                None
            }
            None => None,
        };

        Self {
            error: coerce::string(coerce::get(map, "error")),
            warning: coerce::string(coerce::get(map, "warning")),
            message: coerce::string(coerce::get(map, "message")),
            requires: coerce::string_map(coerce::get(map, "requires")),
            see_also: coerce::string_map(coerce::get(map, "see-also")),
            install,
            settings: Settings::from_value(
                coerce::get(map, "exports")
                    .or_else(|| coerce::get(map, "settings"))
                    .or_else(|| coerce::get(map, "apply")),
            ),
            unless,
        }
    }
}

impl Unless {
    fn from_mapping(
        map: &serde_yaml::Mapping,
        context: &str,
        diagnostics: &mut Vec<ValidationError>,
    ) -> Self {
        let matches_text = coerce::string(coerce::get(map, "is"));
        let matches = match matches_text.as_deref() {
            Some(text) => match Expression::parse(text) {
                Ok(expr) => Some(expr),
                Err(err) => {
                    diagnostics.push(ValidationError::new(
                        ErrorKind::InvalidExpression,
                        format!("'{context}': bad is condition: {err}"),
                    ));
                    None
                }
            },
            None => None,
        };

        Self {
            from: coerce::string_list(coerce::get(map, "from")),
            where_: coerce::string_list(coerce::get(map, "where")),
            run: coerce::string(coerce::get(map, "run")),
            select: coerce::string(coerce::get(map, "select")),
            matches_text,
            matches,
            block: Box::new(DemandBlock::from_mapping(map, context, false, diagnostics)),
        }
    }
}

/// A conditional demand block together with its parsed selector.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalDemand {
    /// The selector text as written.
    pub selector: String,
    /// Parsed media query; `None` when the selector did not parse (the block
    /// is then excluded from evaluation).
    pub query: Option<Query>,
    /// The block itself; `None` when the node was not a mapping.
    pub block: Option<DemandBlock>,
}

/// The ordered demand blocks of a manifest: the always-applicable default
/// block plus the conditional blocks in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandSet {
    /// The unconditional block assembled from the document's top level.
    pub default: DemandBlock,
    /// Conditional blocks keyed by selector, in declaration order.
    pub conditional: Vec<ConditionalDemand>,
}

/// A parsed manifest document.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Identity metadata.
    pub info: Info,
    /// Declared registries.
    pub registries: Vec<RegistryDecl>,
    /// The demand blocks.
    pub demands: DemandSet,
    /// Every shape defect found while building the model. Install gates on
    /// this being empty; nothing mutating runs while defects are present.
    pub diagnostics: Vec<ValidationError>,
    /// The original document text, persisted verbatim as the installed
    /// marker.
    pub source: String,
}

impl Manifest {
    /// Parse a YAML document into the typed model, collecting shape defects.
    ///
    /// # Errors
    ///
    /// Returns a [`ManifestError`] only when no model can be built at all:
    /// unparseable YAML, a non-mapping root, or a missing/incomplete `info`
    /// block. Everything else is collected into
    /// [`diagnostics`](Self::diagnostics).
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let root: Value = serde_yaml::from_str(text)?;
        let Value::Mapping(map) = &root else {
            return Err(ManifestError::NotAMapping);
        };

        let info = match coerce::get(map, "info") {
            Some(Value::Mapping(info)) => {
                let id = coerce::string(coerce::get(info, "id"))
                    .ok_or_else(|| ManifestError::MissingInfo("id missing".to_string()))?;
                let version = coerce::string(coerce::get(info, "version"))
                    .ok_or_else(|| ManifestError::MissingInfo("version missing".to_string()))?;
                Info {
                    id,
                    version,
                    summary: coerce::string(coerce::get(info, "summary")),
                }
            }
            _ => return Err(ManifestError::MissingInfo("info block missing".to_string())),
        };

        let mut diagnostics = Vec::new();
        let registries = parse_registries(coerce::get(map, "registries"));
        let default = DemandBlock::from_mapping(map, "default", true, &mut diagnostics);

        let mut conditional = Vec::new();
        for (key, value) in map {
            let Some(selector) = key.as_str() else {
                continue;
            };
            if RESERVED.contains(&selector) || STRUCTURAL.contains(&selector) {
                continue;
            }
            let query = match Query::parse(selector) {
                Ok(query) => Some(query),
                Err(err) => {
                    diagnostics.push(ValidationError::new(
                        ErrorKind::ParseError,
                        format!("error parsing conditional demand '{selector}': {err}"),
                    ));
                    None
                }
            };
            let block = match value {
                Value::Mapping(inner) => Some(DemandBlock::from_mapping(
                    inner,
                    selector,
                    true,
                    &mut diagnostics,
                )),
                _ => {
                    diagnostics.push(ValidationError::new(
                        ErrorKind::IncorrectType,
                        format!("conditional demand '{selector}' is not an object"),
                    ));
                    None
                }
            };
            conditional.push(ConditionalDemand {
                selector: selector.to_string(),
                query,
                block,
            });
        }

        Ok(Self {
            info,
            registries,
            demands: DemandSet {
                default,
                conditional,
            },
            diagnostics,
            source: text.to_string(),
        })
    }

    /// True when no shape defects were collected.
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

fn parse_registries(value: Option<&Value>) -> Vec<RegistryDecl> {
    let mut decls = Vec::new();
    match value {
        Some(Value::Sequence(entries)) => {
            for entry in entries {
                if let Value::Mapping(map) = entry {
                    if let Some(name) = coerce::string(coerce::get(map, "name")) {
                        decls.push(decl_from(map, name));
                    }
                }
            }
        }
        Some(Value::Mapping(named)) => {
            for (key, value) in named {
                if let (Some(name), Value::Mapping(map)) = (key.as_str(), value) {
                    decls.push(decl_from(map, name.to_string()));
                }
            }
        }
        _ => {}
    }
    decls
}

fn decl_from(map: &serde_yaml::Mapping, name: String) -> RegistryDecl {
    RegistryDecl {
        name,
        kind: coerce::string(coerce::get(map, "kind")).unwrap_or_else(|| "artifact".to_string()),
        location: coerce::string_list(coerce::get(map, "location")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "\
info:
  id: tools/cmake
  version: 3.28.1
  summary: cross-platform build tool
registries:
  - name: main
    kind: artifact
    location: /var/registry
requires:
  main:compilers/ninja: ^1.11
install:
  unzip: https://example.org/cmake.zip
  sha256: 0e5e8a
windows:
  exports:
    tools:
      cmake: bin/cmake.exe
linux and x64:
  requires:
    main:tools/patchelf: '*'
";

    #[test]
    fn parses_default_and_conditional_blocks() {
        let m = Manifest::parse(BASIC).unwrap();
        assert!(m.is_valid(), "{:?}", m.diagnostics);
        assert_eq!(m.info.id, "tools/cmake");
        assert_eq!(m.info.version, "3.28.1");
        assert_eq!(m.registries.len(), 1);
        assert_eq!(m.registries[0].location, vec!["/var/registry"]);
        assert_eq!(
            m.demands.default.requires,
            vec![("main:compilers/ninja".to_string(), "^1.11".to_string())]
        );
        assert_eq!(m.demands.default.install.len(), 1);
        assert_eq!(m.demands.conditional.len(), 2);
        assert_eq!(m.demands.conditional[0].selector, "windows");
        assert_eq!(m.demands.conditional[1].selector, "linux and x64");
    }

    #[test]
    fn reserved_keys_are_not_selectors() {
        let m = Manifest::parse(
            "info: {id: a, version: '1'}\ncontacts: {author: {}}\nwarning: careful\n",
        )
        .unwrap();
        assert!(m.demands.conditional.is_empty());
        assert_eq!(m.demands.default.warning.as_deref(), Some("careful"));
    }

    #[test]
    fn bad_selector_is_collected_and_excluded() {
        let m =
            Manifest::parse("info: {id: a, version: '1'}\n'windows &&& x64': {error: nope}\n")
                .unwrap();
        assert_eq!(m.diagnostics.len(), 1);
        assert_eq!(m.diagnostics[0].kind, ErrorKind::ParseError);
        assert_eq!(m.demands.conditional.len(), 1);
        assert!(m.demands.conditional[0].query.is_none());
    }

    #[test]
    fn non_mapping_block_is_incorrect_type() {
        let m = Manifest::parse("info: {id: a, version: '1'}\nwindows: just a string\n").unwrap();
        assert_eq!(m.diagnostics.len(), 1);
        assert_eq!(m.diagnostics[0].kind, ErrorKind::IncorrectType);
        assert!(m.demands.conditional[0].block.is_none());
    }

    #[test]
    fn nested_unless_is_invalid() {
        let text = "\
info: {id: a, version: '1'}
linux:
  unless:
    from: [/usr/bin]
    where: [tool]
    unless:
      from: [/bin]
      where: [tool]
";
        let m = Manifest::parse(text).unwrap();
        assert!(
            m.diagnostics
                .iter()
                .any(|d| d.kind == ErrorKind::InvalidDefinition)
        );
    }

    #[test]
    fn bad_is_condition_is_invalid_expression() {
        let text = "\
info: {id: a, version: '1'}
linux:
  unless:
    from: [/usr/bin]
    where: [tool]
    is: 'not a comparison at $'
";
        let m = Manifest::parse(text).unwrap();
        assert!(
            m.diagnostics
                .iter()
                .any(|d| d.kind == ErrorKind::InvalidExpression)
        );
    }

    #[test]
    fn unless_carries_probe_fields_and_alternate_block() {
        let text = "\
info: {id: a, version: '1'}
linux:
  requires:
    main:tools/python: '*'
  unless:
    from: [/usr/bin, /usr/local/bin]
    where: [python3]
    run: $0 --version
    select: '/Python (\\d+)\\.(\\d+)/'
    is: $1 >= 3
    exports:
      variables:
        PYTHON: [$0]
";
        let m = Manifest::parse(text).unwrap();
        assert!(m.is_valid(), "{:?}", m.diagnostics);
        let block = m.demands.conditional[0].block.as_ref().unwrap();
        let unless = block.unless.as_ref().unwrap();
        assert_eq!(unless.from.len(), 2);
        assert_eq!(unless.where_, vec!["python3"]);
        assert_eq!(unless.run.as_deref(), Some("$0 --version"));
        assert!(unless.matches.is_some());
        assert_eq!(unless.block.settings.variables.len(), 1);
        assert_eq!(block.requires.len(), 1);
    }

    #[test]
    fn ambiguous_installer_is_collected() {
        let text = "\
info: {id: a, version: '1'}
install:
  - unzip: https://example.org/x.zip
    untar: https://example.org/x.tar
";
        let m = Manifest::parse(text).unwrap();
        assert!(
            m.diagnostics
                .iter()
                .any(|d| d.kind == ErrorKind::UnsupportedInstaller)
        );
        assert!(m.demands.default.install.is_empty());
    }

    #[test]
    fn rejects_documents_without_identity() {
        assert!(matches!(
            Manifest::parse("just a string"),
            Err(ManifestError::NotAMapping)
        ));
        assert!(matches!(
            Manifest::parse("info: {id: a}"),
            Err(ManifestError::MissingInfo(_))
        ));
    }
}
