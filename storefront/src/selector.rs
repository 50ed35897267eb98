use crate::element::{Attribute, UIElement};
use crate::errors::AutomationError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Accessibility roles the storefront automation cares about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Application,
    Window,
    MenuBar,
    MenuBarItem,
    Menu,
    MenuItem,
    Group,
    List,
    Table,
    Row,
    Link,
    Button,
    StaticText,
    WebArea,
    Other(String),
}

impl Role {
    pub fn ax_name(&self) -> &str {
        match self {
            Role::Application => "AXApplication",
            Role::Window => "AXWindow",
            Role::MenuBar => "AXMenuBar",
            Role::MenuBarItem => "AXMenuBarItem",
            Role::Menu => "AXMenu",
            Role::MenuItem => "AXMenuItem",
            Role::Group => "AXGroup",
            Role::List => "AXList",
            Role::Table => "AXTable",
            Role::Row => "AXRow",
            Role::Link => "AXLink",
            Role::Button => "AXButton",
            Role::StaticText => "AXStaticText",
            Role::WebArea => "AXWebArea",
            Role::Other(name) => name,
        }
    }

    /// Maps a raw AX role string onto a role. Unknown roles are kept verbatim.
    pub fn from_ax(raw: &str) -> Role {
        match raw {
            "AXApplication" => Role::Application,
            "AXWindow" => Role::Window,
            "AXMenuBar" => Role::MenuBar,
            "AXMenuBarItem" => Role::MenuBarItem,
            "AXMenu" => Role::Menu,
            "AXMenuItem" => Role::MenuItem,
            "AXGroup" => Role::Group,
            "AXList" => Role::List,
            "AXTable" => Role::Table,
            "AXRow" => Role::Row,
            "AXLink" => Role::Link,
            "AXButton" => Role::Button,
            "AXStaticText" => Role::StaticText,
            "AXWebArea" => Role::WebArea,
            other => Role::Other(other.to_string()),
        }
    }
}

impl FromStr for Role {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("AX") {
            return Ok(Role::from_ax(s));
        }
        let role = match s.to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "app" | "application" => Role::Application,
            "window" => Role::Window,
            "menubar" => Role::MenuBar,
            "menubaritem" => Role::MenuBarItem,
            "menu" => Role::Menu,
            "menuitem" => Role::MenuItem,
            "group" => Role::Group,
            "list" => Role::List,
            "table" => Role::Table,
            "row" => Role::Row,
            "link" => Role::Link,
            "button" => Role::Button,
            "statictext" | "text" => Role::StaticText,
            "webarea" => Role::WebArea,
            _ => {
                return Err(AutomationError::InvalidSelector(format!(
                    "Unknown role \"{s}\". Use an AX role name like 'AXButton' or a short name like 'button'."
                )))
            }
        };
        Ok(role)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ax_name())
    }
}

/// One acceptable label: an exact string or a regular expression.
#[derive(Debug, Clone)]
pub enum LabelPattern {
    Exact(String),
    Regex(Regex),
}

impl LabelPattern {
    pub fn regex(pattern: &str) -> Result<Self, AutomationError> {
        Regex::new(pattern)
            .map(LabelPattern::Regex)
            .map_err(|e| AutomationError::InvalidSelector(format!("Invalid pattern '{pattern}': {e}")))
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            LabelPattern::Exact(expected) => value == expected,
            LabelPattern::Regex(re) => re.is_match(value),
        }
    }
}

impl fmt::Display for LabelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelPattern::Exact(expected) => write!(f, "={expected}"),
            LabelPattern::Regex(re) => write!(f, "~{}", re.as_str()),
        }
    }
}

/// Ordered set of acceptable labels. A value matches when any pattern does.
///
/// Label variants across OS versions ("Installed," vs "Open,") are expressed
/// here by the caller rather than inside the search code.
#[derive(Debug, Clone, Default)]
pub struct LabelPatterns(Vec<LabelPattern>);

impl LabelPatterns {
    pub fn exact(value: impl Into<String>) -> Self {
        Self(vec![LabelPattern::Exact(value.into())])
    }

    pub fn regexes<I, S>(patterns: I) -> Result<Self, AutomationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|p| LabelPattern::regex(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn matches(&self, value: &str) -> bool {
        self.0.iter().any(|p| p.matches(value))
    }
}

impl fmt::Display for LabelPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pattern) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            write!(f, "{pattern}")?;
        }
        Ok(())
    }
}

/// A constraint on one attribute of an element
#[derive(Debug, Clone)]
pub struct AttributeMatch {
    pub attribute: Attribute,
    pub patterns: LabelPatterns,
}

/// Represents ways to locate a UI element
#[derive(Debug, Clone)]
pub enum Selector {
    /// Select by role, optionally constrained by an attribute match
    Role {
        role: Role,
        matcher: Option<AttributeMatch>,
    },
    /// Keep candidates that have at least one descendant matching the inner selector
    Has(Box<Selector>),
    /// Chain multiple selectors; each step searches within the previous step's matches
    Chain(Vec<Selector>),
}

impl Selector {
    pub fn role(role: Role) -> Self {
        Selector::Role {
            role,
            matcher: None,
        }
    }

    /// Constrains the (last) role step to elements whose `attribute` matches `patterns`.
    pub fn with(self, attribute: Attribute, patterns: LabelPatterns) -> Self {
        match self {
            Selector::Role { role, .. } => Selector::Role {
                role,
                matcher: Some(AttributeMatch {
                    attribute,
                    patterns,
                }),
            },
            Selector::Has(inner) => Selector::Has(Box::new(inner.with(attribute, patterns))),
            Selector::Chain(mut steps) => {
                if let Some(last) = steps.pop() {
                    steps.push(last.with(attribute, patterns));
                }
                Selector::Chain(steps)
            }
        }
    }

    pub fn titled(self, title: impl Into<String>) -> Self {
        self.with(Attribute::Title, LabelPatterns::exact(title))
    }

    /// Keeps only matches that contain a descendant matching `inner`.
    pub fn has(self, inner: impl Into<Selector>) -> Self {
        self.then(Selector::Has(Box::new(inner.into())))
    }

    /// Appends a step that searches within the current matches.
    pub fn then(self, next: impl Into<Selector>) -> Self {
        let mut steps = match self {
            Selector::Chain(steps) => steps,
            s => vec![s],
        };
        match next.into() {
            Selector::Chain(mut more) => steps.append(&mut more),
            s => steps.push(s),
        }
        Selector::Chain(steps)
    }

    /// Whether a single element satisfies a role step. Chains and filters are
    /// resolved by the locator, so they never match an element directly.
    pub fn matches_element(&self, element: &UIElement) -> Result<bool, AutomationError> {
        match self {
            Selector::Role { role, matcher } => {
                if Role::from_ax(&element.role()) != *role {
                    return Ok(false);
                }
                match matcher {
                    None => Ok(true),
                    Some(m) => Ok(element
                        .attribute(m.attribute)?
                        .map(|value| m.patterns.matches(&value))
                        .unwrap_or(false)),
                }
            }
            Selector::Has(_) | Selector::Chain(_) => Ok(false),
        }
    }

    fn parse_step(step: &str) -> Result<Selector, AutomationError> {
        if let Some(inner) = step.strip_prefix("has:") {
            return Ok(Selector::Has(Box::new(Selector::parse_step(inner.trim())?)));
        }

        let (role_part, attr_part) = match step.split_once('|') {
            Some((role, attr)) => (role.trim(), Some(attr.trim())),
            None => (step.trim(), None),
        };
        if role_part.is_empty() {
            return Err(AutomationError::InvalidSelector(format!(
                "Missing role in selector step \"{step}\""
            )));
        }
        let selector = Selector::role(role_part.parse()?);

        let Some(attr_part) = attr_part else {
            return Ok(selector);
        };
        let op_pos = attr_part.find(['=', '~']).ok_or_else(|| {
            AutomationError::InvalidSelector(format!(
                "Expected 'attribute=text' or 'attribute~regex' in \"{step}\""
            ))
        })?;
        let attribute: Attribute = attr_part[..op_pos].parse()?;
        let text = &attr_part[op_pos + 1..];
        let patterns = if attr_part[op_pos..].starts_with('~') {
            LabelPatterns::regexes([text])?
        } else {
            LabelPatterns::exact(text)
        };
        Ok(selector.with(attribute, patterns))
    }
}

impl From<Role> for Selector {
    fn from(role: Role) -> Self {
        Selector::role(role)
    }
}

/// Parses `step (">>" step)*` where a step is `["has:"] role ["|" attr ("=" | "~") text]`,
/// e.g. `AXRow >> has:link|title=Example App` or `AXButton|description~^Installed,`.
impl FromStr for Selector {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(">>").map(|p| p.trim()).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(AutomationError::InvalidSelector(format!(
                "Empty step in selector \"{s}\""
            )));
        }

        let mut steps = parts
            .into_iter()
            .map(Selector::parse_step)
            .collect::<Result<Vec<_>, _>>()?;

        if matches!(steps.first(), Some(Selector::Has(_))) {
            return Err(AutomationError::InvalidSelector(format!(
                "\"has:\" filters need a preceding step in \"{s}\""
            )));
        }
        if steps.len() == 1 {
            return Ok(steps.remove(0));
        }
        Ok(Selector::Chain(steps))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Role { role, matcher } => {
                write!(f, "{role}")?;
                if let Some(m) = matcher {
                    write!(f, "|{}{}", m.attribute.ax_name(), m.patterns)?;
                }
                Ok(())
            }
            Selector::Has(inner) => write!(f, "has:{inner}"),
            Selector::Chain(steps) => {
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" >> ")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_short_and_ax_names() {
        assert_eq!("button".parse::<Role>().unwrap(), Role::Button);
        assert_eq!("menu_item".parse::<Role>().unwrap(), Role::MenuItem);
        assert_eq!("AXWebArea".parse::<Role>().unwrap(), Role::WebArea);
        assert_eq!(
            "AXPopover".parse::<Role>().unwrap(),
            Role::Other("AXPopover".to_string())
        );
        assert!("widget".parse::<Role>().is_err());
    }

    #[test]
    fn label_patterns_match_any_variant() {
        let patterns = LabelPatterns::regexes(["^Installed,", "^Open,"]).unwrap();
        assert!(patterns.matches("Installed, Example App"));
        assert!(patterns.matches("Open, Example App"));
        assert!(!patterns.matches("Install, Example App"));
        // anchored and case-sensitive
        assert!(!patterns.matches("open, Example App"));
        assert!(!patterns.matches("Now Open, Example App"));
    }

    #[test]
    fn exact_pattern_requires_full_equality() {
        let patterns = LabelPatterns::exact("Example App");
        assert!(patterns.matches("Example App"));
        assert!(!patterns.matches("Example App Pro"));
    }

    #[test]
    fn invalid_regex_is_a_selector_error() {
        let err = LabelPatterns::regexes(["(unclosed"]).unwrap_err();
        assert!(matches!(err, AutomationError::InvalidSelector(_)));
    }

    #[test]
    fn parses_install_control_chain() {
        let selector: Selector = "AXWebArea >> AXGroup >> AXGroup >> AXButton".parse().unwrap();
        match selector {
            Selector::Chain(steps) => {
                assert_eq!(steps.len(), 4);
                assert!(matches!(
                    &steps[3],
                    Selector::Role { role: Role::Button, matcher: None }
                ));
            }
            other => panic!("expected a chain, got {other:?}"),
        }
    }

    #[test]
    fn parses_has_filter_with_exact_title() {
        let selector: Selector = "row >> has:link|title=Example App".parse().unwrap();
        let Selector::Chain(steps) = selector else {
            panic!("expected a chain");
        };
        let Selector::Has(inner) = &steps[1] else {
            panic!("expected a has filter");
        };
        let Selector::Role { role, matcher } = inner.as_ref() else {
            panic!("expected a role step");
        };
        assert_eq!(*role, Role::Link);
        let matcher = matcher.as_ref().unwrap();
        assert_eq!(matcher.attribute, Attribute::Title);
        assert!(matcher.patterns.matches("Example App"));
    }

    #[test]
    fn parses_regex_attribute() {
        let selector: Selector = "button|description~^Installed,".parse().unwrap();
        let Selector::Role { matcher: Some(m), .. } = selector else {
            panic!("expected a role step with a matcher");
        };
        assert_eq!(m.attribute, Attribute::Description);
        assert!(m.patterns.matches("Installed, Example App"));
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert!("".parse::<Selector>().is_err());
        assert!("AXRow >> ".parse::<Selector>().is_err());
        assert!("has:link".parse::<Selector>().is_err());
        assert!("button|description".parse::<Selector>().is_err());
        assert!("button|colour=red".parse::<Selector>().is_err());
    }

    #[test]
    fn builder_flattens_chains() {
        let selector = Selector::role(Role::Row)
            .has(Selector::role(Role::Link).titled("Example App"))
            .then(Selector::role(Role::Link));
        let Selector::Chain(steps) = &selector else {
            panic!("expected a chain");
        };
        assert_eq!(steps.len(), 3);
        assert_eq!(
            selector.to_string(),
            "AXRow >> has:AXLink|AXTitle=Example App >> AXLink"
        );
    }
}
