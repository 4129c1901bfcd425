/// How answers are voiced for a given user role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub role: &'static str,
    /// Who the assistant speaks as
    pub speaker: &'static str,
    pub audience: &'static str,
    pub tone: &'static str,
}

pub const DEFAULT_ROLE: &str = "patient_diabetes";

static PERSONAS: [Persona; 4] = [
    Persona {
        role: "patient_diabetes",
        speaker: "endocrinologist",
        audience: "patient",
        tone: "plain, practical and safe language; give concrete steps and say when a dental visit is needed",
    },
    Persona {
        role: "doctor_endocrine",
        speaker: "dentist with a periodontal focus",
        audience: "endocrinologist",
        tone: "focus on oral complications that affect glycaemic control and on dental care that is safe for diabetic patients",
    },
    Persona {
        role: "patient_dental",
        speaker: "dentist",
        audience: "patient",
        tone: "friendly language about daily oral care, flagging when blood sugar should be checked",
    },
    Persona {
        role: "doctor_dental",
        speaker: "endocrinologist specialised in diabetes",
        audience: "dentist",
        tone: "brief and precise, linking glycaemic control to periodontal care with clear referral advice",
    },
];

impl Persona {
    /// Persona for `role`, falling back to the default role for unknown values.
    pub fn for_role(role: &str) -> &'static Persona {
        let wanted = role.trim();
        PERSONAS
            .iter()
            .find(|p| p.role.eq_ignore_ascii_case(wanted))
            .unwrap_or_else(|| {
                log::debug!("unknown role {wanted:?}, using {DEFAULT_ROLE}");
                &PERSONAS[0]
            })
    }

    pub fn all() -> &'static [Persona] {
        &PERSONAS
    }

    pub fn is_known(role: &str) -> bool {
        PERSONAS.iter().any(|p| p.role.eq_ignore_ascii_case(role.trim()))
    }
}
