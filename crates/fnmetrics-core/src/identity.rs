//! Call-site identity.
//!
//! A [`CallIdentity`] is the `(module, function)` pair every instrument of a
//! call site is tagged with. It is derived from [`CallSite`] metadata on each
//! call and must come out byte-identical every time for the same site, since
//! it is the key the instrument registry deduplicates on.

use std::fmt;
use std::sync::OnceLock;

use crate::log_once::LogOnce;

/// Value used for both fields when call-site metadata is missing.
pub const UNKNOWN: &str = "unknown";

/// Identity of an instrumented call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallIdentity {
    module: String,
    function: String,
}

impl CallIdentity {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }

    /// Identity of a method: the function tag becomes `"Type.method"`.
    pub fn method(module: impl Into<String>, type_name: &str, method: &str) -> Self {
        Self::new(module, format!("{type_name}.{method}"))
    }

    /// Sentinel used when a call site cannot be resolved.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Derive the identity from call-site metadata.
    ///
    /// Fails closed: if the function or module name is unavailable the
    /// sentinel identity is returned so the wrapped call still runs. Each
    /// distinct broken site is reported at warn once, then at debug.
    pub fn resolve<S: CallSite + ?Sized>(site: &S) -> Self {
        let function = non_empty(site.function_name());
        let module = non_empty(site.module_path());
        let (Some(function), Some(module)) = (function, module) else {
            if unresolved_sites().first(SiteKey::of(site)) {
                tracing::warn!(
                    function = ?site.function_name(),
                    module = ?site.module_path(),
                    "call site metadata unavailable, using sentinel identity"
                );
            } else {
                tracing::debug!(
                    function = ?site.function_name(),
                    module = ?site.module_path(),
                    "call site metadata unavailable, using sentinel identity"
                );
            }
            return Self::unknown();
        };

        match non_empty(site.declaring_type()) {
            Some(ty) => Self::method(module, ty, function),
            None => Self::new(module, function),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn is_unknown(&self) -> bool {
        self.module == UNKNOWN && self.function == UNKNOWN
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.function)
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Raw metadata of a site that failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SiteKey {
    module: Option<String>,
    type_name: Option<String>,
    function: Option<String>,
}

impl SiteKey {
    fn of<S: CallSite + ?Sized>(site: &S) -> Self {
        Self {
            module: site.module_path().map(str::to_owned),
            type_name: site.declaring_type().map(str::to_owned),
            function: site.function_name().map(str::to_owned),
        }
    }
}

fn unresolved_sites() -> &'static LogOnce<SiteKey> {
    static SEEN: OnceLock<LogOnce<SiteKey>> = OnceLock::new();
    SEEN.get_or_init(LogOnce::new)
}

/// Metadata available at an interception point.
pub trait CallSite {
    /// Bare name of the function being called.
    fn function_name(&self) -> Option<&str>;
    /// Name of the type the function is declared on, if it is a method.
    fn declaring_type(&self) -> Option<&str>;
    /// Owning module path.
    fn module_path(&self) -> Option<&str>;
}

/// Call site described by compile-time strings. Usually built by [`call_site!`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCallSite {
    pub module: &'static str,
    pub type_name: Option<&'static str>,
    pub function: &'static str,
}

impl StaticCallSite {
    pub const fn function(module: &'static str, function: &'static str) -> Self {
        Self {
            module,
            type_name: None,
            function,
        }
    }

    pub const fn method(
        module: &'static str,
        type_name: &'static str,
        function: &'static str,
    ) -> Self {
        Self {
            module,
            type_name: Some(type_name),
            function,
        }
    }
}

impl CallSite for StaticCallSite {
    fn function_name(&self) -> Option<&str> {
        Some(self.function)
    }

    fn declaring_type(&self) -> Option<&str> {
        self.type_name
    }

    fn module_path(&self) -> Option<&str> {
        Some(self.module)
    }
}

/// Build a [`StaticCallSite`] for the current module.
///
/// ```
/// use fnmetrics_core::{call_site, CallIdentity};
///
/// struct Checkout;
/// let site = call_site!(Checkout, "submit");
/// let id = CallIdentity::resolve(&site);
/// assert_eq!(id.function(), "Checkout.submit");
/// assert_eq!(id.module(), module_path!());
/// ```
#[macro_export]
macro_rules! call_site {
    ($function:literal) => {
        $crate::StaticCallSite::function(::core::module_path!(), $function)
    };
    ($ty:ident, $function:literal) => {
        $crate::StaticCallSite::method(::core::module_path!(), ::core::stringify!($ty), $function)
    };
}
