//! Source URL and density-variant (srcset) construction.
//!
//! Pure string work: no I/O and no error cases. Local sources are assumed to be
//! pre-optimized and get no variants. Remote sources get one variant per
//! requested width, with `w` and `q` merged into the original query.

use url::form_urlencoded;

use crate::constants::{DEFAULT_DENSITY_WIDTHS, LOCAL_SOURCE_PREFIXES};

/// Whether `src` names a bundled/local asset (root-relative, relative or alias).
pub fn is_local_source(src: &str) -> bool {
    LOCAL_SOURCE_PREFIXES
        .iter()
        .any(|prefix| src.starts_with(prefix))
}

/// Clamp a quality value into the accepted 1-100 range.
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(1, 100)
}

/// One density candidate of a source set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityVariant {
    /// Full candidate URL
    pub url: String,
    /// Pixel density multiplier (1 = 1x)
    pub density: u32,
}

/// Derived description of what to request for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Primary URL (the source as given)
    pub base_url: String,
    /// Requested quality (1-100)
    pub quality: u8,
    /// Density variants, ascending; empty for local sources
    pub variants: Vec<DensityVariant>,
}

impl SourceDescriptor {
    /// Whether density switching applies to this source.
    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Render the variants as a `srcset` attribute value, e.g.
    /// `"a?w=400&q=90 1x, a?w=800&q=90 2x"`.
    pub fn srcset(&self) -> Option<String> {
        if self.variants.is_empty() {
            return None;
        }

        let candidates: Vec<String> = self
            .variants
            .iter()
            .map(|v| format!("{} {}x", v.url, v.density))
            .collect();
        Some(candidates.join(", "))
    }
}

/// Build the descriptor for `src` at `quality`.
///
/// `width_candidates` lists the requested width for densities 1x, 2x, ... in
/// order; an empty slice falls back to [`DEFAULT_DENSITY_WIDTHS`].
pub fn build(src: &str, quality: u8, width_candidates: &[u32]) -> SourceDescriptor {
    let quality = clamp_quality(quality);

    if is_local_source(src) {
        return SourceDescriptor {
            base_url: src.to_string(),
            quality,
            variants: Vec::new(),
        };
    }

    let widths = if width_candidates.is_empty() {
        &DEFAULT_DENSITY_WIDTHS[..]
    } else {
        width_candidates
    };

    let parts = SplitUrl::parse(src);
    let quality_value = quality.to_string();
    let variants = widths
        .iter()
        .zip(1u32..)
        .map(|(width, density)| {
            let mut params = parts.params.clone();
            set_param(&mut params, "w", &width.to_string());
            set_param(&mut params, "q", &quality_value);
            DensityVariant {
                url: parts.with_params(&params),
                density,
            }
        })
        .collect();

    SourceDescriptor {
        base_url: src.to_string(),
        quality,
        variants,
    }
}

/// Build the descriptor with the default 400/800/1200 widths.
pub fn build_default(src: &str, quality: u8) -> SourceDescriptor {
    build(src, quality, &DEFAULT_DENSITY_WIDTHS)
}

/// A URL split into base, decoded query parameters and fragment.
#[derive(Debug, Clone)]
pub(crate) struct SplitUrl<'a> {
    pub base: &'a str,
    pub params: Vec<(String, String)>,
    pub fragment: Option<&'a str>,
}

impl<'a> SplitUrl<'a> {
    pub fn parse(src: &'a str) -> Self {
        let (rest, fragment) = match src.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (src, None),
        };
        let (base, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut params = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            set_param(&mut params, &key, &value);
        }

        Self {
            base,
            params,
            fragment,
        }
    }

    /// Reassemble with a replacement parameter list.
    pub fn with_params(&self, params: &[(String, String)]) -> String {
        let mut out = self.base.to_string();
        if !params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }
        if let Some(fragment) = self.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}

/// Insert or overwrite `key`, keeping the position of an existing key.
pub(crate) fn set_param(params: &mut Vec<(String, String)>, key: &str, value: &str) {
    match params.iter_mut().find(|(k, _)| k == key) {
        Some(existing) => existing.1 = value.to_string(),
        None => params.push((key.to_string(), value.to_string())),
    }
}
