use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::models::{Attributes, EnrollmentRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Season {
    Winter,
    Summer,
    Fall,
}

impl Season {
    pub fn code(&self) -> u32 {
        match self {
            Season::Winter => 10,
            Season::Summer => 30,
            Season::Fall => 40,
        }
    }

    fn from_month(month: u32) -> Self {
        match month {
            1..=4 => Season::Winter,
            5..=8 => Season::Summer,
            _ => Season::Fall,
        }
    }

    /// Registrar suffixes: the half-term codes fold into their full term.
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "10" | "05" => Some(Season::Winter),
            "30" | "25" => Some(Season::Summer),
            "40" | "35" => Some(Season::Fall),
            _ => None,
        }
    }
}

/// Academic term, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Term {
    pub year: i32,
    pub season: Season,
}

impl Term {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            season: Season::from_month(date.month()),
        }
    }

    /// Parses a six-digit `YYYYSS` term code such as `202240`.
    pub fn parse_code(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = code[..4].parse().ok()?;
        let season = Season::from_suffix(&code[4..])?;
        Some(Self { year, season })
    }
}

impl TryFrom<String> for Term {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Term::parse_code(&code).ok_or_else(|| format!("invalid term code {code:?}"))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.year, self.season.code())
    }
}

/// Class standing a count is attributed to in melted output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
pub enum YearBucket {
    Freshman,
    Sophomore,
    Junior,
    Senior,
    Unclassified,
}

impl YearBucket {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "freshman" => Some(YearBucket::Freshman),
            "sophomore" => Some(YearBucket::Sophomore),
            "junior" => Some(YearBucket::Junior),
            "senior" => Some(YearBucket::Senior),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            YearBucket::Freshman => "Freshman",
            YearBucket::Sophomore => "Sophomore",
            YearBucket::Junior => "Junior",
            YearBucket::Senior => "Senior",
            YearBucket::Unclassified => "Unclassified",
        }
    }
}

impl fmt::Display for YearBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides which year bucket a count recorded in `term` belongs to.
pub trait YearClassifier {
    fn classify(&self, student_id: &str, attributes: &Attributes, term: Term) -> YearBucket;
}

impl<F> YearClassifier for F
where
    F: Fn(&str, &Attributes, Term) -> YearBucket,
{
    fn classify(&self, student_id: &str, attributes: &Attributes, term: Term) -> YearBucket {
        self(student_id, attributes, term)
    }
}

/// Per-term class standings from the registrar export, with a fallback to a
/// descriptive attribute when a term has no enrollment row.
#[derive(Debug, Clone, Default)]
pub struct StandingCalendar {
    standings: HashMap<(String, Term), YearBucket>,
    standing_attribute: Option<String>,
}

impl StandingCalendar {
    pub fn new(enrollment: &[EnrollmentRecord], standing_attribute: Option<String>) -> Self {
        let mut standings = HashMap::new();
        for record in enrollment {
            standings
                .entry((record.student_id.clone(), record.term))
                .or_insert(record.standing);
        }
        Self {
            standings,
            standing_attribute,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.standings.is_empty()
    }

    /// Students enrolled with `standing` in at least one term, optionally
    /// only counting terms from `since` onwards.
    pub fn students_with_standing(&self, standing: YearBucket, since: Option<Term>) -> HashSet<&str> {
        self.standings
            .iter()
            .filter(|((_, term), value)| {
                **value == standing && since.map_or(true, |since| *term >= since)
            })
            .map(|((student_id, _), _)| student_id.as_str())
            .collect()
    }
}

impl YearClassifier for StandingCalendar {
    fn classify(&self, student_id: &str, attributes: &Attributes, term: Term) -> YearBucket {
        if let Some(standing) = self.standings.get(&(student_id.to_string(), term)) {
            return *standing;
        }
        self.standing_attribute
            .as_ref()
            .and_then(|field| attributes.get(field))
            .and_then(|value| YearBucket::parse(value))
            .unwrap_or(YearBucket::Unclassified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn months_map_to_terms() {
        assert_eq!(Term::from_date(date(2023, 4, 30)).to_string(), "202310");
        assert_eq!(Term::from_date(date(2023, 5, 1)).to_string(), "202330");
        assert_eq!(Term::from_date(date(2023, 9, 1)).to_string(), "202340");
    }

    #[test]
    fn half_term_codes_fold_into_full_terms() {
        assert_eq!(Term::parse_code("202235"), Term::parse_code("202240"));
        assert_eq!(Term::parse_code("202305").map(|t| t.season), Some(Season::Winter));
        assert_eq!(Term::parse_code("202320"), None);
        assert_eq!(Term::parse_code("2023"), None);
    }

    #[test]
    fn enrollment_wins_over_attribute() {
        let term = Term::from_date(date(2023, 10, 1));
        let enrollment = vec![EnrollmentRecord {
            student_id: "S1".to_string(),
            term,
            standing: YearBucket::Sophomore,
            attributes: Attributes::new(),
        }];
        let calendar = StandingCalendar::new(&enrollment, Some("college_year".to_string()));
        let mut attributes = Attributes::new();
        attributes.insert("college_year".to_string(), "Senior".to_string());

        assert_eq!(calendar.classify("S1", &attributes, term), YearBucket::Sophomore);
        let other_term = Term::from_date(date(2024, 2, 1));
        assert_eq!(calendar.classify("S1", &attributes, other_term), YearBucket::Senior);
        assert_eq!(
            calendar.classify("S2", &Attributes::new(), term),
            YearBucket::Unclassified
        );
    }

    #[test]
    fn cohort_can_start_at_a_term() {
        let standing = |student_id: &str, code: &str| EnrollmentRecord {
            student_id: student_id.to_string(),
            term: Term::parse_code(code).unwrap(),
            standing: YearBucket::Freshman,
            attributes: Attributes::new(),
        };
        let calendar = StandingCalendar::new(
            &[standing("S1", "202210"), standing("S2", "202240"), standing("S3", "202310")],
            None,
        );

        let everyone = calendar.students_with_standing(YearBucket::Freshman, None);
        assert_eq!(everyone.len(), 3);
        let mut recent: Vec<&str> = calendar
            .students_with_standing(YearBucket::Freshman, Term::parse_code("202240"))
            .into_iter()
            .collect();
        recent.sort();
        assert_eq!(recent, vec!["S2", "S3"]);
        assert!(calendar
            .students_with_standing(YearBucket::Senior, None)
            .is_empty());
    }

    #[test]
    fn buckets_sort_chronologically() {
        let mut buckets = vec![YearBucket::Senior, YearBucket::Unclassified, YearBucket::Freshman];
        buckets.sort();
        assert_eq!(
            buckets,
            vec![YearBucket::Freshman, YearBucket::Senior, YearBucket::Unclassified]
        );
    }
}
