use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::debug;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::communication::Communication;
use crate::decode::{decode, resolve, resolve_required, AttributeGuide, AttributeMapping, Coerce};
use crate::error::DataError;
use crate::registry::PeriodRegistry;

// Discriminator tag the service puts on grade records.
const GRADE_TAG: i64 = 60;

// Tab ids identifying the remote endpoints the lazy operations talk to.
const TAB_GRADES: i64 = 198;
const TAB_HOMEWORK: i64 = 88;
const TAB_ABSENCES: i64 = 113;

// Extracts the list a response carries under a nested path, e.g.
// "donneesSec,donnees,listeDevoirs,V".
fn expect_list<'a>(document: &'a Value, path: &str) -> Result<&'a Vec<Value>, DataError> {
    resolve_required(document, path)?
        .as_array()
        .ok_or_else(|| DataError::UnexpectedShape {
            path: path.to_string(),
            segment: path.rsplit(',').next().unwrap_or(path).to_string(),
        })
}

// The "L" label carried by wrapped name records (teacher names, classrooms).
fn label(item: &Value) -> Result<String, DataError> {
    match resolve_required(item, "L")? {
        Value::String(s) => Ok(s.clone()),
        other => Err(DataError::Coercion {
            field: "label",
            path: "L",
            reason: format!("expected a string, got {other}"),
        }),
    }
}

// A course. Only id and name are always sent; the statistics show up when the
// subject arrives inside a grades/averages response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subject {
    pub id: Option<String>,
    pub name: Option<String>,
    pub groups: Option<bool>,
    pub average: Option<String>,
    pub class_average: Option<String>,
    pub max: Option<String>,
    pub min: Option<String>,
    pub out_of: Option<String>,
    pub default_out_of: Option<String>,
}

const SUBJECT_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "L", field: "name", coerce: Coerce::Str },
    AttributeMapping { path: "estServiceEnGroupe", field: "groups", coerce: Coerce::Bool },
    AttributeMapping { path: "moyEleve,V", field: "average", coerce: Coerce::Str },
    AttributeMapping { path: "moyClasse,V", field: "class_average", coerce: Coerce::Str },
    AttributeMapping { path: "moyMax,V", field: "max", coerce: Coerce::Str },
    AttributeMapping { path: "moyMin,V", field: "min", coerce: Coerce::Str },
    AttributeMapping { path: "baremeMoyEleve,V", field: "out_of", coerce: Coerce::Str },
    AttributeMapping { path: "baremeMoyEleveParDefault,V", field: "default_out_of", coerce: Coerce::Str },
];

impl Subject {
    pub fn new(parsed_json: &Value) -> Result<Self, DataError> {
        let mut record = decode(SUBJECT_GUIDE, parsed_json)?;
        Ok(Subject {
            id: record.take_str("id"),
            name: record.take_str("name"),
            groups: record.take_bool("groups"),
            average: record.take_str("average"),
            class_average: record.take_str("class_average"),
            max: record.take_str("max"),
            min: record.take_str("min"),
            out_of: record.take_str("out_of"),
            default_out_of: record.take_str("default_out_of"),
        })
    }
}

// A class of students, as it appears inside lesson content items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentClass {
    pub id: Option<String>,
    pub name: Option<String>,
}

const STUDENT_CLASS_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "L", field: "name", coerce: Coerce::Str },
];

impl StudentClass {
    pub fn new(parsed_json: &Value) -> Result<Self, DataError> {
        let mut record = decode(STUDENT_CLASS_GUIDE, parsed_json)?;
        Ok(StudentClass {
            id: record.take_str("id"),
            name: record.take_str("name"),
        })
    }
}

// A period of the school year. Construction registers the instance in the
// registry so that grades decoded later can resolve their period reference.
pub struct Period {
    comm: Arc<dyn Communication>,
    registry: Arc<PeriodRegistry>,
    pub id: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

const PERIOD_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "L", field: "name", coerce: Coerce::Str },
    AttributeMapping { path: "dateDebut,V", field: "start", coerce: Coerce::Date },
    AttributeMapping { path: "dateFin,V", field: "end", coerce: Coerce::Date },
];

impl Period {
    pub fn new(
        comm: Arc<dyn Communication>,
        registry: &Arc<PeriodRegistry>,
        parsed_json: &Value,
    ) -> Result<Arc<Self>, DataError> {
        let mut record = decode(PERIOD_GUIDE, parsed_json)?;
        // Periods always arrive complete; a hole here is malformed data.
        let required = |path: &str| DataError::MissingValue { path: path.to_string() };
        let period = Arc::new(Period {
            comm,
            registry: Arc::clone(registry),
            id: record.take_str("id").ok_or_else(|| required("N"))?,
            name: record.take_str("name").ok_or_else(|| required("L"))?,
            start: record.take_date("start").ok_or_else(|| required("dateDebut,V"))?,
            end: record.take_date("end").ok_or_else(|| required("dateFin,V"))?,
        });
        registry.add(Arc::clone(&period));
        Ok(period)
    }

    fn request_body(&self) -> Value {
        json!({
            "donnees": {"Periode": {"N": self.id, "L": self.name}},
            "_Signature_": {"onglet": TAB_GRADES},
        })
    }

    // Fetches the most recent grades of this period.
    pub fn grades(&self) -> Result<Vec<Grade>, DataError> {
        let response = self.comm.post("DernieresNotes", &self.request_body())?;
        expect_list(&response, "donneesSec,donnees,listeDevoirs,V")?
            .iter()
            .map(|g| Grade::new(&self.registry, g))
            .collect()
    }

    // Fetches the per-subject averages of this period.
    pub fn averages(&self) -> Result<Vec<Subject>, DataError> {
        let response = self.comm.post("DernieresNotes", &self.request_body())?;
        expect_list(&response, "donneesSec,donnees,listeServices,V")?
            .iter()
            .map(Subject::new)
            .collect()
    }
}

impl fmt::Debug for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Period")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

// A grade. The period reference is resolved against the registry; it is a
// list of matches but in practice holds at most one period.
#[derive(Debug, Clone)]
pub struct Grade {
    pub id: Option<String>,
    pub grade: Option<String>,
    pub out_of: Option<String>,
    pub default_out_of: Option<String>,
    pub date: Option<NaiveDate>,
    pub subject: Option<Subject>,
    pub period: Vec<Arc<Period>>,
    pub average: Option<String>,
    pub max: Option<String>,
    pub min: Option<String>,
    pub coefficient: i64,
    pub comment: Option<String>,
}

const GRADE_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "note,V", field: "grade", coerce: Coerce::Str },
    AttributeMapping { path: "bareme,V", field: "out_of", coerce: Coerce::Str },
    AttributeMapping { path: "baremeParDefault,V", field: "default_out_of", coerce: Coerce::Str },
    AttributeMapping { path: "date,V", field: "date", coerce: Coerce::Date },
    AttributeMapping { path: "service,V", field: "subject", coerce: Coerce::Subject },
    AttributeMapping { path: "periode,V,N", field: "period_id", coerce: Coerce::Str },
    AttributeMapping { path: "moyenne,V", field: "average", coerce: Coerce::Str },
    AttributeMapping { path: "noteMax,V", field: "max", coerce: Coerce::Str },
    AttributeMapping { path: "noteMin,V", field: "min", coerce: Coerce::Str },
    AttributeMapping { path: "coefficient", field: "coefficient", coerce: Coerce::Int },
    AttributeMapping { path: "commentaire", field: "comment", coerce: Coerce::Str },
];

impl Grade {
    pub fn new(registry: &PeriodRegistry, parsed_json: &Value) -> Result<Self, DataError> {
        let tag = resolve_required(parsed_json, "G")?
            .as_i64()
            .ok_or_else(|| DataError::MissingValue { path: "G".to_string() })?;
        if tag != GRADE_TAG {
            return Err(DataError::UnexpectedTag {
                expected: GRADE_TAG,
                found: tag,
            });
        }
        let mut record = decode(GRADE_GUIDE, parsed_json)?;
        let period = match record.take_str("period_id") {
            Some(period_id) => {
                let matches = registry.find_by_id(&period_id);
                if matches.is_empty() {
                    debug!("grade references unknown period {period_id}");
                }
                matches
            }
            None => Vec::new(),
        };
        Ok(Grade {
            id: record.take_str("id"),
            grade: record.take_str("grade"),
            out_of: record.take_str("out_of"),
            default_out_of: record.take_str("default_out_of"),
            date: record.take_date("date"),
            subject: record.take_subject("subject"),
            period,
            average: record.take_str("average"),
            max: record.take_str("max"),
            min: record.take_str("min"),
            coefficient: record.take_int("coefficient").unwrap_or(1),
            comment: record.take_str("comment"),
        })
    }
}

// A lesson. If it is a pedagogical outing, only `outing` and `start` are
// meaningful. The content items carried under ListeContenus are dispatched on
// their discriminator tag; kinds this layer does not model are skipped.
#[derive(Clone)]
pub struct Lesson {
    comm: Arc<dyn Communication>,
    pub id: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub canceled: Option<bool>,
    pub detention: Option<bool>,
    pub outing: Option<bool>,
    pub subject: Option<Subject>,
    pub teacher_name: Option<String>,
    pub classroom: Option<String>,
    pub group_name: Option<String>,
    pub student_class: Option<StudentClass>,
}

const LESSON_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "DateDuCours,V", field: "start", coerce: Coerce::DateTime },
    AttributeMapping { path: "estAnnule", field: "canceled", coerce: Coerce::Bool },
    AttributeMapping { path: "estRetenue", field: "detention", coerce: Coerce::Bool },
    AttributeMapping { path: "duree", field: "duration", coerce: Coerce::Int },
    AttributeMapping { path: "estSortiePedagogique", field: "outing", coerce: Coerce::Bool },
];

impl Lesson {
    // `class_period` is the duration of one schedule unit; the lesson's
    // `duree` counts units, so `end = start + duree * class_period`.
    pub fn new(
        comm: Arc<dyn Communication>,
        class_period: Duration,
        parsed_json: &Value,
    ) -> Result<Self, DataError> {
        let mut record = decode(LESSON_GUIDE, parsed_json)?;
        let start = record.take_datetime("start");
        let duration = record.take_int("duration");
        let end = match (start, duration) {
            (Some(start), Some(units)) => Some(start + class_period * units as i32),
            _ => None,
        };

        let mut lesson = Lesson {
            comm,
            id: record.take_str("id"),
            start,
            end,
            canceled: record.take_bool("canceled"),
            detention: record.take_bool("detention"),
            outing: record.take_bool("outing"),
            subject: None,
            teacher_name: None,
            classroom: None,
            group_name: None,
            student_class: None,
        };

        if let Some(contents) = resolve(parsed_json, "ListeContenus,V")? {
            let items = contents
                .as_array()
                .ok_or_else(|| DataError::UnexpectedShape {
                    path: "ListeContenus,V".to_string(),
                    segment: "V".to_string(),
                })?;
            for item in items {
                match resolve(item, "G")?.and_then(Value::as_i64) {
                    Some(16) => lesson.subject = Some(Subject::new(item)?),
                    Some(3) => lesson.teacher_name = Some(label(item)?),
                    Some(17) => lesson.classroom = Some(label(item)?),
                    Some(2) => lesson.group_name = Some(label(item)?),
                    Some(1) => lesson.student_class = Some(StudentClass::new(item)?),
                    tag => debug!("skipping lesson content item with tag {tag:?}"),
                }
            }
        }
        Ok(lesson)
    }

    // Fetches the absence entry page for this lesson. The response is kept as
    // raw JSON; this layer does not model its shape.
    pub fn absences(&self) -> Result<Absences, DataError> {
        let id = self
            .id
            .as_ref()
            .ok_or_else(|| DataError::MissingValue { path: "N".to_string() })?;
        let start = self
            .start
            .ok_or_else(|| DataError::MissingValue { path: "DateDuCours,V".to_string() })?;
        let body = json!({
            "_Signature_": {"onglet": TAB_ABSENCES},
            "donnees": {
                "Ressource": {"N": id},
                "Date": {"_T": 7, "V": start.format("%d/%m/%Y 0:0:0").to_string()},
            },
        });
        let response = self.comm.post("PageSaisieAbsences", &body)?;
        Ok(Absences { json: response })
    }
}

impl fmt::Debug for Lesson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lesson")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("canceled", &self.canceled)
            .field("outing", &self.outing)
            .field("subject", &self.subject)
            .field("teacher_name", &self.teacher_name)
            .field("classroom", &self.classroom)
            .finish()
    }
}

// Undecoded absence-page payload returned by `Lesson::absences`.
#[derive(Debug, Clone)]
pub struct Absences {
    pub json: Value,
}

// A homework entry. `done` is only ever changed through `set_done`, which
// writes to the service first and mutates local state on success only.
#[derive(Clone)]
pub struct Homework {
    comm: Arc<dyn Communication>,
    pub id: Option<String>,
    pub subject: Option<Subject>,
    pub description: Option<String>,
    pub done: Option<bool>,
}

const HOMEWORK_GUIDE: AttributeGuide = &[
    AttributeMapping { path: "N", field: "id", coerce: Coerce::Str },
    AttributeMapping { path: "Matiere,V", field: "subject", coerce: Coerce::Subject },
    AttributeMapping { path: "descriptif,V", field: "description", coerce: Coerce::StripHtml },
    AttributeMapping { path: "TAFFait", field: "done", coerce: Coerce::Bool },
];

impl Homework {
    pub fn new(comm: Arc<dyn Communication>, parsed_json: &Value) -> Result<Self, DataError> {
        let mut record = decode(HOMEWORK_GUIDE, parsed_json)?;
        Ok(Homework {
            comm,
            id: record.take_str("id"),
            subject: record.take_subject("subject"),
            description: record.take_str("description"),
            done: record.take_bool("done"),
        })
    }

    // Marks the homework done (or not) on the service, then locally. If the
    // remote write fails, the local flag is left untouched.
    pub fn set_done(&mut self, status: bool) -> Result<(), DataError> {
        let id = self
            .id
            .as_ref()
            .ok_or_else(|| DataError::MissingValue { path: "N".to_string() })?;
        let body = json!({
            "_Signature_": {"onglet": TAB_HOMEWORK},
            "donnees": {"listeTAF": [{"N": id, "TAFFait": status}]},
        });
        self.comm.post("SaisieTAFFaitEleve", &body)?;
        self.done = Some(status);
        Ok(())
    }
}

impl fmt::Debug for Homework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Homework")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("description", &self.description)
            .field("done", &self.done)
            .finish()
    }
}
