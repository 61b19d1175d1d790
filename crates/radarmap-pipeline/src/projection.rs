//! Named projections and point transforms between them.
//!
//! Projections are created from PROJ-style definition strings
//! (`+proj=aeqd +R=1 +lon_0=37.5 +lat_0=55.6`, `+init=epsg:3857`, ...)
//! and transform points through geodetic longitude/latitude as the
//! common space. Only the three projections this tool needs are
//! supported, all on a sphere:
//!
//! - geodetic longitude/latitude (radians in and out, as in PROJ 4);
//! - azimuthal equidistant around an arbitrary origin;
//! - Mercator, including Web-Mercator (EPSG:3857).
//!
//! Formulas follow Snyder, *Map Projections: A Working Manual* (USGS
//! 1987), spherical forms. No C library is involved, so the same code
//! runs anywhere the rest of the pipeline does.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use geo::Coord;

/// Semi-major axis of WGS84, the sphere radius of Web-Mercator.
pub const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Below this distance (in sphere radii) a point is at the projection
/// origin.
const ORIGIN_EPSILON: f64 = 1e-12;

/// Errors raised while creating projections or transforming points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    /// Neither `+proj` nor `+init` was given.
    #[error("projection definition '{0}' names no projection")]
    MissingProjection(String),

    /// A token does not have the `+key` or `+key=value` form.
    #[error("malformed token '{0}' in projection definition")]
    MalformedToken(String),

    /// A parameter value could not be interpreted.
    #[error("invalid value '{value}' for +{key}")]
    InvalidParameter {
        /// Parameter name without the leading `+`.
        key: String,
        /// The offending value.
        value: String,
    },

    /// The projection or one of its options is outside the supported set.
    #[error("unsupported projection: {0}")]
    Unsupported(String),

    /// The point cannot be represented in the target projection.
    #[error("point ({x}, {y}) is outside the projection domain")]
    OutOfDomain {
        /// Input x coordinate.
        x: f64,
        /// Input y coordinate.
        y: f64,
    },
}

/// A projection handle.
///
/// Coordinates are `geo::Coord<f64>`: radians for
/// [`Geodetic`](Self::Geodetic), sphere units (metres for Web-Mercator,
/// radians for a unit sphere) for the others.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in radians.
    Geodetic,
    /// Spherical azimuthal equidistant.
    AzimuthalEquidistant {
        /// Sphere radius.
        radius: f64,
        /// Origin longitude in radians.
        lon_0: f64,
        /// Origin latitude in radians.
        lat_0: f64,
        /// False easting.
        x_0: f64,
        /// False northing.
        y_0: f64,
    },
    /// Spherical Mercator.
    Mercator {
        /// Sphere radius.
        radius: f64,
        /// Central meridian in radians.
        lon_0: f64,
        /// Scale factor on the equator.
        k_0: f64,
        /// False easting.
        x_0: f64,
        /// False northing.
        y_0: f64,
    },
}

type Params<'a> = BTreeMap<&'a str, Option<&'a str>>;

impl Projection {
    /// Web-Mercator as used by web map tiles (EPSG:3857).
    #[must_use]
    pub const fn web_mercator() -> Self {
        Self::Mercator {
            radius: WEB_MERCATOR_RADIUS,
            lon_0: 0.0,
            k_0: 1.0,
            x_0: 0.0,
            y_0: 0.0,
        }
    }

    /// Create a projection from a PROJ-style definition.
    ///
    /// # Errors
    ///
    /// Returns a [`ProjectionError`] describing why the definition
    /// cannot be used: a malformed token, a missing or unsupported
    /// projection name, an ellipsoidal figure where a sphere is
    /// required, or an unparsable number.
    pub fn from_definition(definition: &str) -> Result<Self, ProjectionError> {
        let params = parse_params(definition)?;

        if let Some(init) = params.get("init") {
            let init = init.ok_or_else(|| invalid("init", ""))?;
            return match init.to_ascii_lowercase().as_str() {
                "epsg:3857" | "epsg:900913" => Ok(Self::web_mercator()),
                "epsg:4326" => Ok(Self::Geodetic),
                other => Err(ProjectionError::Unsupported(format!("+init={other}"))),
            };
        }

        let name = params
            .get("proj")
            .copied()
            .flatten()
            .ok_or_else(|| ProjectionError::MissingProjection(definition.to_owned()))?;

        check_units(&params)?;

        match name {
            "latlong" | "longlat" | "latlon" | "lonlat" => Ok(Self::Geodetic),
            "aeqd" => Ok(Self::AzimuthalEquidistant {
                radius: sphere_radius(&params)?,
                lon_0: degrees(&params, "lon_0")?.to_radians(),
                lat_0: degrees(&params, "lat_0")?.to_radians(),
                x_0: number(&params, "x_0")?.unwrap_or(0.0),
                y_0: number(&params, "y_0")?.unwrap_or(0.0),
            }),
            "merc" => {
                let k_0 = match (number(&params, "k_0")?, number(&params, "k")?) {
                    (Some(k), _) | (None, Some(k)) => k,
                    (None, None) => degrees(&params, "lat_ts")?.to_radians().cos(),
                };
                Ok(Self::Mercator {
                    radius: sphere_radius(&params)?,
                    lon_0: degrees(&params, "lon_0")?.to_radians(),
                    k_0,
                    x_0: number(&params, "x_0")?.unwrap_or(0.0),
                    y_0: number(&params, "y_0")?.unwrap_or(0.0),
                })
            }
            other => Err(ProjectionError::Unsupported(format!("+proj={other}"))),
        }
    }

    /// Whether this projection works in geodetic longitude/latitude.
    #[must_use]
    pub const fn is_geodetic(&self) -> bool {
        matches!(self, Self::Geodetic)
    }

    /// Project geodetic longitude/latitude (radians) into this
    /// projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] for points with no finite
    /// image: the poles in Mercator, the antipode of an azimuthal
    /// origin.
    pub fn forward(&self, lonlat: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let Coord { x: lam, y: phi } = lonlat;
        let out_of_domain = || ProjectionError::OutOfDomain { x: lam, y: phi };
        let projected = match *self {
            Self::Geodetic => lonlat,
            Self::AzimuthalEquidistant {
                radius,
                lon_0,
                lat_0,
                x_0,
                y_0,
            } => {
                let dlam = lam - lon_0;
                let (sin_phi, cos_phi) = phi.sin_cos();
                let (sin_phi0, cos_phi0) = lat_0.sin_cos();
                let cos_dlam = dlam.cos();
                let cos_c = sin_phi0.mul_add(sin_phi, cos_phi0 * cos_phi * cos_dlam);
                let c = cos_c.clamp(-1.0, 1.0).acos();
                let k = if c < ORIGIN_EPSILON {
                    1.0
                } else {
                    let sin_c = c.sin();
                    if sin_c < ORIGIN_EPSILON {
                        return Err(out_of_domain());
                    }
                    c / sin_c
                };
                Coord {
                    x: (radius * k * cos_phi).mul_add(dlam.sin(), x_0),
                    y: (radius * k).mul_add(
                        cos_phi0.mul_add(sin_phi, -(sin_phi0 * cos_phi * cos_dlam)),
                        y_0,
                    ),
                }
            }
            Self::Mercator {
                radius,
                lon_0,
                k_0,
                x_0,
                y_0,
            } => {
                if phi.abs() >= FRAC_PI_2 {
                    return Err(out_of_domain());
                }
                let scale = radius * k_0;
                Coord {
                    x: scale.mul_add(wrap_longitude(lam - lon_0), x_0),
                    y: scale.mul_add((FRAC_PI_4 + phi / 2.0).tan().ln(), y_0),
                }
            }
        };
        finite(projected).ok_or_else(out_of_domain)
    }

    /// Unproject a point of this projection into geodetic
    /// longitude/latitude (radians).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::OutOfDomain`] if the point lies
    /// outside the projected area (beyond the antipode of an azimuthal
    /// origin) or is not finite.
    pub fn inverse(&self, point: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let out_of_domain = || ProjectionError::OutOfDomain {
            x: point.x,
            y: point.y,
        };
        let lonlat = match *self {
            Self::Geodetic => point,
            Self::AzimuthalEquidistant {
                radius,
                lon_0,
                lat_0,
                x_0,
                y_0,
            } => {
                let x = point.x - x_0;
                let y = point.y - y_0;
                let rho = x.hypot(y);
                let c = rho / radius;
                if c > PI + ORIGIN_EPSILON {
                    return Err(out_of_domain());
                }
                if c < ORIGIN_EPSILON {
                    Coord { x: lon_0, y: lat_0 }
                } else {
                    let (sin_c, cos_c) = c.sin_cos();
                    let (sin_phi0, cos_phi0) = lat_0.sin_cos();
                    let phi = cos_c
                        .mul_add(sin_phi0, y * sin_c * cos_phi0 / rho)
                        .clamp(-1.0, 1.0)
                        .asin();
                    let lam = (x * sin_c).atan2(
                        (rho * cos_phi0).mul_add(cos_c, -(y * sin_phi0 * sin_c)),
                    );
                    Coord {
                        x: wrap_longitude(lon_0 + lam),
                        y: phi,
                    }
                }
            }
            Self::Mercator {
                radius,
                lon_0,
                k_0,
                x_0,
                y_0,
            } => {
                let scale = radius * k_0;
                Coord {
                    x: wrap_longitude((point.x - x_0) / scale + lon_0),
                    y: 2.0f64.mul_add(-(-(point.y - y_0) / scale).exp().atan(), FRAC_PI_2),
                }
            }
        };
        finite(lonlat).ok_or_else(out_of_domain)
    }
}

/// Transform a point from one projection into another through geodetic
/// longitude/latitude.
///
/// # Errors
///
/// Propagates [`ProjectionError::OutOfDomain`] from either step.
pub fn transform(
    from: &Projection,
    to: &Projection,
    point: Coord<f64>,
) -> Result<Coord<f64>, ProjectionError> {
    to.forward(from.inverse(point)?)
}

/// Bring a longitude into `[-π, π]`.
fn wrap_longitude(lam: f64) -> f64 {
    if (-PI..=PI).contains(&lam) {
        lam
    } else {
        (lam + PI).rem_euclid(2.0 * PI) - PI
    }
}

fn finite(c: Coord<f64>) -> Option<Coord<f64>> {
    (c.x.is_finite() && c.y.is_finite()).then_some(c)
}

fn invalid(key: &str, value: &str) -> ProjectionError {
    ProjectionError::InvalidParameter {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

fn parse_params(definition: &str) -> Result<Params<'_>, ProjectionError> {
    let mut params = Params::new();
    for token in definition.split_whitespace() {
        let body = token
            .strip_prefix('+')
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ProjectionError::MalformedToken(token.to_owned()))?;
        match body.split_once('=') {
            Some((key, value)) => params.insert(key, Some(value)),
            None => params.insert(body, None),
        };
    }
    Ok(params)
}

fn number(params: &Params<'_>, key: &str) -> Result<Option<f64>, ProjectionError> {
    match params.get(key) {
        None => Ok(None),
        Some(None) => Err(invalid(key, "")),
        Some(Some(raw)) => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(key, raw)),
    }
}

/// Decimal-degree parameter, zero when absent.
fn degrees(params: &Params<'_>, key: &str) -> Result<f64, ProjectionError> {
    Ok(number(params, key)?.unwrap_or(0.0))
}

fn sphere_radius(params: &Params<'_>) -> Result<f64, ProjectionError> {
    let radius = match (number(params, "R")?, number(params, "a")?, number(params, "b")?) {
        (Some(r), _, _) => r,
        (None, Some(a), None) => a,
        (None, Some(a), Some(b)) if (a - b).abs() <= f64::EPSILON * a.abs() => a,
        (None, Some(_), Some(_)) => {
            return Err(ProjectionError::Unsupported(
                "ellipsoidal figure (+a differs from +b)".to_owned(),
            ));
        }
        (None, None, _) => {
            return Err(ProjectionError::Unsupported(
                "ellipsoidal figure (give +R or +a for a sphere)".to_owned(),
            ));
        }
    };
    if radius > 0.0 {
        Ok(radius)
    } else {
        Err(invalid("R", &radius.to_string()))
    }
}

fn check_units(params: &Params<'_>) -> Result<(), ProjectionError> {
    match params.get("units") {
        None | Some(Some("m")) => Ok(()),
        Some(Some(other)) => Err(ProjectionError::Unsupported(format!("+units={other}"))),
        Some(None) => Err(invalid("units", "")),
    }
}
