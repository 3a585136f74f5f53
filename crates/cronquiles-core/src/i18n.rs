use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Datelike, Utc};
use serde::{Serialize, Serializer};

use crate::datetime::display_timezone;

const MONTHS_ES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

const MONTHS_EN: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DAYS_ES: [&str; 7] = ["Dom", "Lun", "Mar", "Mié", "Jue", "Vie", "Sáb"];
const DAYS_EN: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// The two supported interface languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    Es,
    En,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::Es, Locale::En];

    /// Short tag stored in preferences and the `lang` query parameter.
    pub fn tag(self) -> &'static str {
        match self {
            Locale::Es => "es",
            Locale::En => "en",
        }
    }

    pub fn bcp47(self) -> &'static str {
        match self {
            Locale::Es => "es-MX",
            Locale::En => "en-US",
        }
    }

    pub fn is_spanish(self) -> bool {
        self == Locale::Es
    }

    /// Translation lookup; falls back to Spanish, then to the key itself.
    pub fn t<'a>(self, key: &'a str) -> &'a str {
        lookup(self, key)
            .or_else(|| lookup(Locale::Es, key))
            .unwrap_or(key)
    }

    pub fn month_name(self, month: u32) -> &'static str {
        let idx = (month.clamp(1, 12) - 1) as usize;
        match self {
            Locale::Es => MONTHS_ES[idx],
            Locale::En => MONTHS_EN[idx],
        }
    }

    /// Short weekday names, Sunday first.
    pub fn weekday_names(self) -> [&'static str; 7] {
        match self {
            Locale::Es => DAYS_ES,
            Locale::En => DAYS_EN,
        }
    }

    pub fn weekday_name(self, days_from_sunday: u32) -> &'static str {
        self.weekday_names()[(days_from_sunday % 7) as usize]
    }

    /// e.g. "1 de marzo de 2025" / "March 1, 2025", in the display timezone.
    pub fn format_long_date(self, dt: DateTime<Utc>) -> String {
        let local = dt.with_timezone(display_timezone());
        let month = self.month_name(local.month());
        match self {
            Locale::Es => format!(
                "{} de {} de {}",
                local.day(),
                month.to_lowercase(),
                local.year()
            ),
            Locale::En => format!("{} {}, {}", month, local.day(), local.year()),
        }
    }

    /// Compact pill date, e.g. "1 mar" / "Mar 1".
    pub fn format_short_date(self, dt: DateTime<Utc>) -> String {
        let local = dt.with_timezone(display_timezone());
        let month: String = self.month_name(local.month()).chars().take(3).collect();
        match self {
            Locale::Es => format!("{} {}", local.day(), month.to_lowercase()),
            Locale::En => format!("{} {}", month, local.day()),
        }
    }

    pub fn format_time(self, dt: DateTime<Utc>) -> String {
        let local = dt.with_timezone(display_timezone());
        match self {
            Locale::Es => local.format("%H:%M").to_string(),
            Locale::En => local.format("%I:%M %p").to_string(),
        }
    }

    /// "18:00 - 20:00", or just the start when the end is missing or equal.
    pub fn format_time_range(
        self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let start = self.format_time(start?);
        match end.map(|end| self.format_time(end)) {
            Some(end) if end != start => Some(format!("{start} - {end}")),
            _ => Some(start),
        }
    }

    /// Message shown when a region feed could not be loaded.
    pub fn feed_error_message(self, kind: &str, city: &str) -> String {
        match kind {
            "NOT_FOUND" => format!("{} ({city})", self.t("error.notFound")),
            _ => format!("{} {city}", self.t("error.loading")),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for Locale {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.tag())
    }
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let primary = lower.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "es" => Ok(Locale::Es),
            "en" => Ok(Locale::En),
            _ => Err(anyhow!("unsupported language: {s}")),
        }
    }
}

fn lookup(locale: Locale, key: &str) -> Option<&'static str> {
    let text = match (locale, key) {
        (Locale::Es, "calendar.loading") => "Cargando calendario...",
        (Locale::En, "calendar.loading") => "Loading calendar...",
        (Locale::Es, "calendar.empty") => {
            "No hay eventos disponibles para mostrar en el calendario"
        }
        (Locale::En, "calendar.empty") => "No events available to display in the calendar",
        (Locale::Es, "calendar.noEvents") => "No hay eventos programados este mes",
        (Locale::En, "calendar.noEvents") => "No events scheduled this month",
        (Locale::Es, "cal.prev") => "◀ Anterior",
        (Locale::En, "cal.prev") => "◀ Previous",
        (Locale::Es, "cal.next") => "Siguiente ▶",
        (Locale::En, "cal.next") => "Next ▶",
        (Locale::Es, "cal.today") => "Hoy",
        (Locale::En, "cal.today") => "Today",
        (Locale::Es, "cal.showMore") => "Ver más →",
        (Locale::En, "cal.showMore") => "Show more →",
        (Locale::Es, "cal.showLess") => "Ver menos ←",
        (Locale::En, "cal.showLess") => "Show less ←",
        (Locale::Es, "cal.eventsOf") => "Eventos de",
        (Locale::En, "cal.eventsOf") => "Events of",
        (Locale::Es, "cal.viewEvent") => "Ver evento →",
        (Locale::En, "cal.viewEvent") => "View event →",
        (Locale::Es, "cal.viewOnMap") => "Ver en mapa",
        (Locale::En, "cal.viewOnMap") => "View on map",
        (Locale::Es, "cal.loadMore") => "Cargar siguiente mes ▼",
        (Locale::En, "cal.loadMore") => "Load next month ▼",
        (Locale::Es, "cal.online") => "En línea",
        (Locale::En, "cal.online") => "Online",
        (Locale::Es, "cal.untitled") => "Evento sin título",
        (Locale::En, "cal.untitled") => "Untitled event",
        (Locale::Es, "section.communities") => "Comunidades Integradas",
        (Locale::En, "section.communities") => "Integrated Communities",
        (Locale::Es, "section.regions") => "Regiones",
        (Locale::En, "section.regions") => "Regions",
        (Locale::Es, "section.upcoming") => "Próximos eventos",
        (Locale::En, "section.upcoming") => "Upcoming events",
        (Locale::Es, "footer.lastUpdate") => "Última actualización:",
        (Locale::En, "footer.lastUpdate") => "Last update:",
        (Locale::Es, "footer.notAvailable") => "No disponible",
        (Locale::En, "footer.notAvailable") => "Not available",
        (Locale::Es, "btn.download.ics") => "Descargar ICS",
        (Locale::En, "btn.download.ics") => "Download ICS",
        (Locale::Es, "btn.download.json") => "Descargar JSON",
        (Locale::En, "btn.download.json") => "Download JSON",
        (Locale::Es, "btn.copy.webcal") => "Copiar WebCal",
        (Locale::En, "btn.copy.webcal") => "Copy WebCal",
        (Locale::Es, "error.notFound") => "No hay datos para esta región",
        (Locale::En, "error.notFound") => "No data for this region",
        (Locale::Es, "error.loading") => "Error al cargar datos de",
        (Locale::En, "error.loading") => "Error loading data for",
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Locale;

    #[test]
    fn parses_tags_and_regional_variants() {
        assert_eq!("es".parse::<Locale>().expect("es"), Locale::Es);
        assert_eq!("en-US".parse::<Locale>().expect("en-US"), Locale::En);
        assert_eq!("ES_mx".parse::<Locale>().expect("es_MX"), Locale::Es);
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn lookup_falls_back_to_key() {
        assert_eq!(Locale::En.t("cal.online"), "Online");
        assert_eq!(Locale::Es.t("cal.online"), "En línea");
        assert_eq!(Locale::En.t("no.such.key"), "no.such.key");
    }

    #[test]
    fn formats_dates_in_display_timezone() {
        let dt = Utc
            .with_ymd_and_hms(2025, 3, 2, 2, 30, 0)
            .single()
            .expect("valid dt");
        assert_eq!(Locale::Es.format_long_date(dt), "1 de marzo de 2025");
        assert_eq!(Locale::En.format_long_date(dt), "March 1, 2025");
        assert_eq!(Locale::Es.format_short_date(dt), "1 mar");
        assert_eq!(Locale::Es.format_time(dt), "20:30");
        assert_eq!(Locale::En.format_time(dt), "08:30 PM");
    }

    #[test]
    fn time_range_collapses_equal_ends() {
        let start = Utc
            .with_ymd_and_hms(2025, 3, 1, 18, 0, 0)
            .single()
            .expect("valid start");
        let end = Utc
            .with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid end");
        assert_eq!(
            Locale::Es.format_time_range(Some(start), Some(end)).as_deref(),
            Some("12:00 - 14:00")
        );
        assert_eq!(
            Locale::Es.format_time_range(Some(start), Some(start)).as_deref(),
            Some("12:00")
        );
        assert_eq!(Locale::Es.format_time_range(None, Some(end)), None);
    }
}
