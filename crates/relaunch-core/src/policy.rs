//! Image cache policy.
//!
//! One policy type covers both rebuild modes. Resolving a policy is pure:
//! the purge of the previous image is carried out by the build stage.

/// How the next image build treats existing images and layer cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Reuse the existing image and layer cache.
    #[default]
    Cached,
    /// Drop the tagged image, ignore layer cache, and re-pull base images.
    Fresh,
}

/// Build flags derived from a [`CachePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildFlags {
    /// Remove the currently tagged image before building.
    pub purge_existing: bool,
    /// Pass `--no-cache` to the build.
    pub no_cache: bool,
    /// Pass `--pull` to the build.
    pub pull: bool,
}

impl CachePolicy {
    /// Resolve the policy from the operator's `--force` flag.
    pub fn from_force(force: bool) -> Self {
        if force { Self::Fresh } else { Self::Cached }
    }

    pub fn build_flags(self) -> BuildFlags {
        match self {
            Self::Cached => BuildFlags {
                purge_existing: false,
                no_cache: false,
                pull: false,
            },
            Self::Fresh => BuildFlags {
                purge_existing: true,
                no_cache: true,
                pull: true,
            },
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fresh => "fresh",
        }
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl BuildFlags {
    /// Extra arguments for `docker build`.
    pub fn to_args(self) -> Vec<String> {
        let mut args = Vec::new();
        if self.no_cache {
            args.push("--no-cache".to_owned());
        }
        if self.pull {
            args.push("--pull".to_owned());
        }
        args
    }
}
