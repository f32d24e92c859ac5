use std::str::FromStr;

use const_oid::db::rfc5280::ID_CE_FRESHEST_CRL;
use der::asn1::Ia5String;
use tracing::debug;
use x509_cert::{
    ext::{
        Extension,
        pkix::{
            FreshestCrl,
            crl::dp::DistributionPoint,
            name::{DistributionPointName, GeneralName},
        },
    },
    name::Name,
};

use crate::extensions::config::ExtensionConfig;
use crate::extensions::encode_extension;
use crate::extensions::errors::{ExtensionError, ExtensionResult};

const NUM_POINTS: &str = "numPoints";
const MAX_POINTS: usize = 64;

/// Kind of name a configured delta CRL location uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Uri,
    DirectoryName,
}

impl FromStr for PointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uri" => Ok(PointType::Uri),
            "directoryname" => Ok(PointType::DirectoryName),
            other => Err(format!("unknown point type {other}")),
        }
    }
}

/// Builds FreshestCRL from `numPoints` and the `pointType<i>` / `pointName<i>`
/// pairs. Pairs with an empty type or name are skipped; `None` is returned
/// when nothing is left.
pub fn generate(config: &ExtensionConfig, critical: bool) -> ExtensionResult<Option<Extension>> {
    let num_points = config.get_usize(NUM_POINTS)?.unwrap_or(0);
    if num_points > MAX_POINTS {
        return Err(ExtensionError::invalid(
            NUM_POINTS,
            format!("{num_points} exceeds the maximum of {MAX_POINTS}"),
        ));
    }
    let mut points = Vec::new();

    for i in 0..num_points {
        let type_key = format!("pointType{i}");
        let name_key = format!("pointName{i}");
        let (Some(point_type), Some(point_name)) = (config.get(&type_key), config.get(&name_key))
        else {
            debug!(index = i, "Skipping incomplete FreshestCRL point");
            continue;
        };

        let point_type: PointType = point_type
            .parse()
            .map_err(|reason| ExtensionError::invalid(&type_key, reason))?;
        points.push(distribution_point(point_type, point_name)?);
    }

    if points.is_empty() {
        return Ok(None);
    }
    encode_extension(ID_CE_FRESHEST_CRL, critical, &FreshestCrl(points)).map(Some)
}

fn distribution_point(point_type: PointType, name: &str) -> ExtensionResult<DistributionPoint> {
    let general_name = match point_type {
        PointType::Uri => GeneralName::UniformResourceIdentifier(Ia5String::new(name)?),
        PointType::DirectoryName => GeneralName::DirectoryName(Name::from_str(name)?),
    };
    Ok(DistributionPoint {
        distribution_point: Some(DistributionPointName::FullName(vec![general_name])),
        reasons: None,
        crl_issuer: None,
    })
}
