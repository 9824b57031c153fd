use std::fmt;

use crate::adapters::{self, RegionAdapter};
use crate::calendar::CalendarDate;
use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionId {
    CastillaLaMancha,
    CastillaLeon,
    Extremadura,
    Madrid,
}

impl RegionId {
    pub const ALL: [RegionId; 4] = [
        RegionId::CastillaLaMancha,
        RegionId::CastillaLeon,
        RegionId::Extremadura,
        RegionId::Madrid,
    ];

    /// The adapter that knows this region's markup.
    pub fn adapter(self) -> &'static dyn RegionAdapter {
        match self {
            RegionId::CastillaLaMancha => &adapters::clm::ClmAdapter,
            RegionId::CastillaLeon => &adapters::cyl::CylAdapter,
            RegionId::Extremadura => &adapters::extremadura::ExtremaduraAdapter,
            RegionId::Madrid => &adapters::madrid::MadridAdapter,
        }
    }

    pub fn descriptor(self) -> Region {
        match self {
            RegionId::CastillaLaMancha => Region {
                id: self,
                name: "Castilla-La Mancha",
                slug: "clm",
                requires_form_post: false,
                historical_start_date: CalendarDate::from_ymd(2017, 2, 1),
                default_owner: "Presidente",
                allowed_domains: &["transparencia.castillalamancha.es"],
            },
            RegionId::CastillaLeon => Region {
                id: self,
                name: "Castilla-León",
                slug: "cyl",
                requires_form_post: false,
                historical_start_date: CalendarDate::from_ymd(2012, 11, 21),
                default_owner: "Presidente",
                allowed_domains: &["comunicacion.jcyl.es"],
            },
            RegionId::Extremadura => Region {
                id: self,
                name: "Extremadura",
                slug: "extremadura",
                requires_form_post: false,
                historical_start_date: CalendarDate::from_ymd(2012, 3, 1),
                default_owner: "Presidente",
                allowed_domains: &["www.juntaex.es"],
            },
            RegionId::Madrid => Region {
                id: self,
                name: "Madrid",
                slug: "madrid",
                requires_form_post: true,
                historical_start_date: CalendarDate::from_ymd(2019, 8, 19),
                default_owner: "Presidenta",
                allowed_domains: &["www.comunidad.madrid"],
            },
        }
    }
}

/// Static description of one supported region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: RegionId,
    pub name: &'static str,
    pub slug: &'static str,
    pub requires_form_post: bool,
    pub historical_start_date: CalendarDate,
    pub default_owner: &'static str,
    pub allowed_domains: &'static [&'static str],
}

impl Region {
    pub fn adapter(&self) -> &'static dyn RegionAdapter {
        self.id.adapter()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Catalog of supported regions, built once per invocation.
#[derive(Debug, Clone)]
pub struct Registry {
    regions: Vec<Region>,
}

impl Registry {
    pub fn builtin() -> Self {
        Self {
            regions: RegionId::ALL.iter().map(|id| id.descriptor()).collect(),
        }
    }

    /// Looks a region up by display name or slug, ignoring case.
    pub fn resolve(&self, name: &str) -> Result<&Region, RegistryError> {
        let wanted = name.trim();
        self.regions
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(wanted) || r.slug.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| RegistryError::UnknownRegion {
                name: name.to_string(),
                known: self.list_names().iter().map(|n| n.to_string()).collect(),
            })
    }

    /// Resolves `all` to every region, anything else to exactly one.
    pub fn select(&self, name: &str) -> Result<Vec<&Region>, RegistryError> {
        if name.trim().eq_ignore_ascii_case("all") {
            Ok(self.regions.iter().collect())
        } else {
            self.resolve(name).map(|r| vec![r])
        }
    }

    pub fn list_names(&self) -> Vec<&'static str> {
        self.regions.iter().map(|r| r.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }
}
