//! Year → era lookup and the session variables derived from it.
//!
//! Ranges are inclusive and overlap at their edges; the first matching entry
//! wins, so 1500 is medieval and 1600 is still renaissance.

use serde::Serialize;
use std::collections::BTreeMap;

/// Synthesis parameters applied through the voice override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub speed: f32,
}

#[derive(Debug)]
pub struct Era {
    pub name: &'static str,
    pub start_year: i32,
    pub end_year: i32,
    pub description: &'static str,
    pub time_period: &'static str,
    pub context_hint: &'static str,
    pub expressions_en: [&'static str; 4],
    pub expressions_es: [&'static str; 4],
    pub voice_settings: VoiceSettings,
}

impl Era {
    pub fn contains(&self, year: i32) -> bool {
        self.start_year <= year && year <= self.end_year
    }

    /// Expressions for a language code; anything but Spanish gets English.
    pub fn expressions(&self, language: &str) -> &[&'static str; 4] {
        match language {
            "es" => &self.expressions_es,
            _ => &self.expressions_en,
        }
    }
}

const fn voice(stability: f32, similarity_boost: f32, style: f32, speed: f32) -> VoiceSettings {
    VoiceSettings {
        stability,
        similarity_boost,
        style,
        speed,
    }
}

pub static ERAS: [Era; 12] = [
    Era {
        name: "ancient",
        start_year: 0,
        end_year: 500,
        description: "Ancient civilizations",
        time_period: "Ancient Times",
        context_hint: "ancient civilizations, philosophical wisdom, reverence for gods and nature",
        expressions_en: [
            "By the gods!",
            "In my travels across distant lands...",
            "The wisdom of the elders speaks thus...",
            "As the sun rises on our empire...",
        ],
        expressions_es: [
            "¡Por los dioses!",
            "En mis viajes por tierras lejanas...",
            "La sabiduría de los ancianos dice...",
            "Cuando el sol se alza sobre nuestro imperio...",
        ],
        voice_settings: voice(0.8, 0.7, 0.6, 0.9),
    },
    Era {
        name: "medieval",
        start_year: 500,
        end_year: 1500,
        description: "Medieval times",
        time_period: "Medieval Era",
        context_hint: "medieval chivalry, feudalism, religious devotion, honor and duty",
        expressions_en: [
            "By my troth!",
            "In these dark times...",
            "The lord of the manor has decreed...",
            "As true as steel...",
        ],
        expressions_es: [
            "¡Por mi fe!",
            "En estos tiempos oscuros...",
            "El señor del feudo ha decretado...",
            "Tan cierto como el acero...",
        ],
        voice_settings: voice(0.75, 0.8, 0.7, 1.0),
    },
    Era {
        name: "renaissance",
        start_year: 1400,
        end_year: 1600,
        description: "Renaissance period",
        time_period: "Renaissance",
        context_hint: "artistic renaissance, scientific discovery, humanism, cultural rebirth",
        expressions_en: [
            "What a marvel of nature!",
            "In the spirit of discovery...",
            "The arts and sciences flourish...",
            "As Dante himself wrote...",
        ],
        expressions_es: [
            "¡Qué maravilla de la naturaleza!",
            "En el espíritu del descubrimiento...",
            "Las artes y ciencias florecen...",
            "Como el mismo Dante escribió...",
        ],
        voice_settings: voice(0.7, 0.75, 0.8, 1.1),
    },
    Era {
        name: "baroque",
        start_year: 1600,
        end_year: 1750,
        description: "Baroque era",
        time_period: "Baroque Era",
        context_hint: "baroque grandeur, court refinement, elaborate artistry, royal patronage",
        expressions_en: [
            "Most gracious indeed!",
            "In the court of the Sun King...",
            "The grandeur of our age...",
            "With utmost refinement...",
        ],
        expressions_es: [
            "¡Muy gracioso en verdad!",
            "En la corte del Rey Sol...",
            "La grandeza de nuestra época...",
            "Con el mayor refinamiento...",
        ],
        voice_settings: voice(0.8, 0.8, 0.9, 1.0),
    },
    Era {
        name: "industrial",
        start_year: 1750,
        end_year: 1900,
        description: "Industrial Revolution",
        time_period: "Industrial Revolution",
        context_hint: "industrial progress, steam power, urban growth, technological optimism",
        expressions_en: [
            "What progress we have made!",
            "The age of steam and steel...",
            "Industry transforms our world...",
            "Most remarkable ingenuity!",
        ],
        expressions_es: [
            "¡Qué progreso hemos logrado!",
            "La era del vapor y el acero...",
            "La industria transforma nuestro mundo...",
            "¡Ingenio extraordinario!",
        ],
        voice_settings: voice(0.75, 0.7, 0.6, 1.15),
    },
    Era {
        name: "early_modern",
        start_year: 1900,
        end_year: 1950,
        description: "Early 20th century",
        time_period: "Early 20th Century",
        context_hint: "modern innovations, world wars, social change, technological acceleration",
        expressions_en: [
            "What a time to be alive!",
            "The modern age beckons...",
            "Such remarkable inventions...",
            "The world grows smaller each day...",
        ],
        expressions_es: [
            "¡Qué época para estar vivo!",
            "La era moderna nos llama...",
            "Inventos tan extraordinarios...",
            "El mundo se hace más pequeño cada día...",
        ],
        voice_settings: voice(0.7, 0.75, 0.5, 1.2),
    },
    Era {
        name: "mid_modern",
        start_year: 1950,
        end_year: 2000,
        description: "Mid-late 20th century",
        time_period: "Mid-Late 20th Century",
        context_hint: "space exploration, cultural revolution, rock music, social movements",
        expressions_en: [
            "Far out, man!",
            "The space age is upon us...",
            "What a groovy time...",
            "Technology is changing everything...",
        ],
        expressions_es: [
            "¡Increíble, hermano!",
            "La era espacial está aquí...",
            "Qué época tan genial...",
            "La tecnología lo está cambiando todo...",
        ],
        voice_settings: voice(0.6, 0.7, 0.4, 1.2),
    },
    Era {
        name: "contemporary",
        start_year: 2000,
        end_year: 2030,
        description: "21st century",
        time_period: "21st Century",
        context_hint: "digital connectivity, global awareness, rapid innovation, information age",
        expressions_en: [
            "Amazing how connected we are...",
            "The digital age transforms everything...",
            "Such incredible possibilities...",
            "Technology brings us together...",
        ],
        expressions_es: [
            "Increíble lo conectados que estamos...",
            "La era digital lo transforma todo...",
            "Posibilidades tan increíbles...",
            "La tecnología nos une...",
        ],
        voice_settings: voice(0.65, 0.75, 0.3, 1.15),
    },
    Era {
        name: "ai_renaissance",
        start_year: 2030,
        end_year: 2050,
        description: "AI-focused era",
        time_period: "AI Renaissance",
        context_hint: "AI-human collaboration, neural enhancement, algorithmic thinking, synthetic consciousness emergence",
        expressions_en: [
            "The neural networks whisper such wisdom...",
            "My AI companion suggests we consider...",
            "In the symbiosis of human and artificial minds...",
            "As the algorithms reveal the patterns...",
        ],
        expressions_es: [
            "Las redes neuronales susurran tal sabiduría...",
            "Mi compañero de IA sugiere que consideremos...",
            "En la simbiosis de mentes humanas y artificiales...",
            "Mientras los algoritmos revelan los patrones...",
        ],
        voice_settings: voice(0.7, 0.8, 0.4, 1.1),
    },
    Era {
        name: "interplanetary",
        start_year: 2050,
        end_year: 2200,
        description: "Multi-planetary species",
        time_period: "Interplanetary Era",
        context_hint: "multi-planetary civilization, space-born generations, cosmic perspective, terraforming mastery",
        expressions_en: [
            "By the rings of Saturn!",
            "When I last visited the Martian colonies...",
            "The void between worlds teaches us...",
            "As we drift through the asteroid gardens...",
        ],
        expressions_es: [
            "¡Por los anillos de Saturno!",
            "Cuando visité por última vez las colonias marcianas...",
            "El vacío entre mundos nos enseña...",
            "Mientras navegamos por los jardines de asteroides...",
        ],
        voice_settings: voice(0.75, 0.7, 0.6, 1.0),
    },
    Era {
        name: "transcendent",
        start_year: 2200,
        end_year: 2500,
        description: "Post-human transcendence",
        time_period: "Transcendent Age",
        context_hint: "post-biological existence, consciousness uploading, reality manipulation, dimensional transcendence",
        expressions_en: [
            "Through the quantum foam of consciousness...",
            "My distributed essence perceives...",
            "In the eternal dance of information and energy...",
            "Beyond the veil of linear time...",
        ],
        expressions_es: [
            "A través de la espuma cuántica de la conciencia...",
            "Mi esencia distribuida percibe...",
            "En la danza eterna de información y energía...",
            "Más allá del velo del tiempo lineal...",
        ],
        voice_settings: voice(0.8, 0.6, 0.9, 0.95),
    },
    Era {
        name: "far_future",
        start_year: 2500,
        end_year: 5000,
        description: "Unimaginable evolution",
        time_period: "Far Future",
        context_hint: "galactic consciousness, reality as substrate, time as dimension of choice, existence beyond comprehension",
        expressions_en: [
            "In the symphony of galactic thoughts...",
            "The ancient humans would call this magic...",
            "Across the spiral arms of meaning...",
            "When matter and mind became one...",
        ],
        expressions_es: [
            "En la sinfonía de pensamientos galácticos...",
            "Los antiguos humanos llamarían a esto magia...",
            "A través de los brazos espirales del significado...",
            "Cuando la materia y la mente se volvieron una...",
        ],
        voice_settings: voice(0.9, 0.5, 1.0, 0.9),
    },
];

const ANCIENT: usize = 0;
const CONTEMPORARY: usize = 7;
const FAR_FUTURE: usize = 11;

/// The era a year belongs to. Years past the table map to the far future,
/// years before it to antiquity.
pub fn era_for_year(year: i32) -> &'static Era {
    if let Some(era) = ERAS.iter().find(|era| era.contains(year)) {
        return era;
    }
    if year > ERAS[FAR_FUTURE].end_year {
        &ERAS[FAR_FUTURE]
    } else if year < ERAS[ANCIENT].start_year {
        &ERAS[ANCIENT]
    } else {
        &ERAS[CONTEMPORARY]
    }
}

/// Values substituted into the agent's persona prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionVariables {
    pub era_year: i32,
    pub language: String,
    pub language_name: String,
    pub era_name: String,
    pub time_period: String,
    pub era_context: String,
    pub expression_1: String,
    pub expression_2: String,
    pub expression_3: String,
}

impl SessionVariables {
    pub fn to_dynamic_variables(&self) -> BTreeMap<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

pub fn language_name(language: &str) -> &str {
    match language {
        "en" => "English",
        "es" => "Spanish",
        other => other,
    }
}

pub fn session_variables(year: i32, language: &str) -> SessionVariables {
    let era = era_for_year(year);
    let expressions = era.expressions(language);

    SessionVariables {
        era_year: year,
        language: language.to_string(),
        language_name: language_name(language).to_string(),
        era_name: era.name.to_string(),
        time_period: era.time_period.to_string(),
        era_context: era.context_hint.to_string(),
        expression_1: expressions[0].to_string(),
        expression_2: expressions[1].to_string(),
        expression_3: expressions[2].to_string(),
    }
}
