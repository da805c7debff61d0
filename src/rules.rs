//! Clasificación por reglas fijas: extensión + palabras clave del nombre.
//!
//! Es el último nivel y nunca falla: siempre hay una carpeta de reserva.

use crate::models::{FileSignature, RoutingMethod, RoutingSuggestion};
use crate::templates::TemplateName;

pub const KEYWORD_CONFIDENCE: f64 = 0.8;
pub const EXTENSION_DEFAULT_CONFIDENCE: f64 = 0.6;
pub const FALLBACK_CONFIDENCE: f64 = 0.4;

pub struct KeywordRule {
    pub keywords: &'static [&'static str],
    pub folder: &'static str,
}

pub struct ExtensionRule {
    pub extensions: &'static [&'static str],
    pub keyword_rules: &'static [KeywordRule],
    pub default_folder: &'static str,
}

pub struct RuleTable {
    pub rules: &'static [ExtensionRule],
    pub fallback_folder: &'static str,
}

const CAD: &[&str] = &["dwg", "dxf", "dwf", "rvt", "ifc"];
const DOCUMENTS: &[&str] = &["pdf"];
const TEXT: &[&str] = &["doc", "docx", "odt", "rtf", "txt"];
const SHEETS: &[&str] = &["xls", "xlsx", "ods", "csv"];
const IMAGES: &[&str] = &["jpg", "jpeg", "png", "heic", "tif", "tiff"];
const MAIL: &[&str] = &["eml", "msg"];

static LUNGO_RULES: RuleTable = RuleTable {
    rules: &[
        ExtensionRule {
            extensions: CAD,
            keyword_rules: &[
                KeywordRule {
                    keywords: &["pianta", "prospett", "sezion", "architett"],
                    folder: "3_PROGETTO/ARC/",
                },
                KeywordRule {
                    keywords: &["strutt", "carpenter", "armatur", "fondazion", "solaio"],
                    folder: "3_PROGETTO/STR/",
                },
                KeywordRule {
                    keywords: &["elettric", "illuminazion", "quadro"],
                    folder: "3_PROGETTO/IMP/ELETTRICO/",
                },
                KeywordRule {
                    keywords: &["termic", "idraulic", "meccanic", "clima"],
                    folder: "3_PROGETTO/IMP/MECCANICO/",
                },
                KeywordRule {
                    keywords: &["rilievo", "stato_di_fatto", "stato di fatto"],
                    folder: "2_RILIEVO/RILIEVO_METRICO/",
                },
            ],
            default_folder: "3_PROGETTO/",
        },
        ExtensionRule {
            extensions: DOCUMENTS,
            keyword_rules: &[
                KeywordRule {
                    keywords: &["contratto", "incarico", "disciplinare", "offerta"],
                    folder: "1_AMMINISTRATIVA/CONTRATTO/",
                },
                KeywordRule {
                    keywords: &["parcella", "fattura", "notula", "onorari"],
                    folder: "9_PARCELLA/",
                },
                KeywordRule {
                    keywords: &["visura", "catast", "mappa"],
                    folder: "2_RILIEVO/DOCUMENTI_CATASTALI/",
                },
                KeywordRule {
                    keywords: &["psc", "sicurezza"],
                    folder: "6_SICUREZZA/PSC/",
                },
                KeywordRule {
                    keywords: &["fascicolo"],
                    folder: "6_SICUREZZA/FASCICOLO/",
                },
                KeywordRule {
                    keywords: &["computo", "elenco_prezzi", "elenco prezzi"],
                    folder: "5_COMPUTI/COMPUTO_METRICO/",
                },
                KeywordRule {
                    keywords: &["permesso", "scia", "cila", "comune"],
                    folder: "4_PRATICHE/COMUNE/",
                },
                KeywordRule {
                    keywords: &["sismic", "genio"],
                    folder: "4_PRATICHE/GENIO_CIVILE/",
                },
                KeywordRule {
                    keywords: &["antincendio", "vvf", "vigili"],
                    folder: "4_PRATICHE/VIGILI_FUOCO/",
                },
                KeywordRule {
                    keywords: &["giornale"],
                    folder: "7_DIREZIONE_LAVORI/GIORNALE_LAVORI/",
                },
                KeywordRule {
                    keywords: &["stato_avanzamento", "stato avanzamento", "_sal_"],
                    folder: "7_DIREZIONE_LAVORI/SAL/",
                },
                KeywordRule {
                    keywords: &["collaudo", "certificato"],
                    folder: "8_COLLAUDO/",
                },
                KeywordRule {
                    keywords: &["verbale"],
                    folder: "7_DIREZIONE_LAVORI/VERBALI_CANTIERE/",
                },
                KeywordRule {
                    keywords: &["relazione", "calcolo"],
                    folder: "3_PROGETTO/RELAZIONI/",
                },
                KeywordRule {
                    keywords: &["pianta", "prospett", "sezion", "tavola"],
                    folder: "3_PROGETTO/ARC/",
                },
            ],
            default_folder: "0_CONSEGNA/",
        },
        ExtensionRule {
            extensions: TEXT,
            keyword_rules: &[
                KeywordRule {
                    keywords: &["relazione", "calcolo"],
                    folder: "3_PROGETTO/RELAZIONI/",
                },
                KeywordRule {
                    keywords: &["contratto", "incarico", "disciplinare"],
                    folder: "1_AMMINISTRATIVA/CONTRATTO/",
                },
                KeywordRule {
                    keywords: &["verbale", "riunione"],
                    folder: "1_AMMINISTRATIVA/VERBALI/",
                },
                KeywordRule {
                    keywords: &["lettera", "comunicazione", "richiesta"],
                    folder: "1_AMMINISTRATIVA/CORRISPONDENZA/",
                },
            ],
            default_folder: "1_AMMINISTRATIVA/",
        },
        ExtensionRule {
            extensions: SHEETS,
            keyword_rules: &[
                KeywordRule {
                    keywords: &["elenco", "prezzi", "analisi"],
                    folder: "5_COMPUTI/ELENCO_PREZZI/",
                },
                KeywordRule {
                    keywords: &["computo", "metrico", "stima"],
                    folder: "5_COMPUTI/COMPUTO_METRICO/",
                },
                KeywordRule {
                    keywords: &["parcella", "onorari", "dm143", "dm_143"],
                    folder: "9_PARCELLA/",
                },
            ],
            default_folder: "5_COMPUTI/",
        },
        ExtensionRule {
            extensions: IMAGES,
            keyword_rules: &[KeywordRule {
                keywords: &["cantiere", "lavori", "getto"],
                folder: "7_DIREZIONE_LAVORI/FOTO_CANTIERE/",
            }],
            default_folder: "2_RILIEVO/FOTO/",
        },
        ExtensionRule {
            extensions: MAIL,
            keyword_rules: &[],
            default_folder: "1_AMMINISTRATIVA/CORRISPONDENZA/",
        },
    ],
    fallback_folder: "0_CONSEGNA/",
};

static BREVE_RULES: RuleTable = RuleTable {
    rules: &[
        ExtensionRule {
            extensions: CAD,
            keyword_rules: &[],
            default_folder: "2_ELABORATI/GRAFICI/",
        },
        ExtensionRule {
            extensions: DOCUMENTS,
            keyword_rules: &[
                KeywordRule {
                    keywords: &["parcella", "fattura", "notula", "onorari"],
                    folder: "4_PARCELLA/",
                },
                KeywordRule {
                    keywords: &["visura", "catast", "mappa"],
                    folder: "1_DOCUMENTI/CATASTALI/",
                },
                KeywordRule {
                    keywords: &["permesso", "scia", "cila", "pratica", "comune"],
                    folder: "3_PRATICHE/",
                },
                KeywordRule {
                    keywords: &["relazione", "perizia", "calcolo"],
                    folder: "2_ELABORATI/RELAZIONI/",
                },
                KeywordRule {
                    keywords: &["pianta", "prospett", "sezion", "tavola"],
                    folder: "2_ELABORATI/GRAFICI/",
                },
                KeywordRule {
                    keywords: &["contratto", "incarico", "documento", "identita"],
                    folder: "1_DOCUMENTI/AMMINISTRATIVI/",
                },
            ],
            default_folder: "0_CONSEGNA/",
        },
        ExtensionRule {
            extensions: TEXT,
            keyword_rules: &[KeywordRule {
                keywords: &["relazione", "perizia"],
                folder: "2_ELABORATI/RELAZIONI/",
            }],
            default_folder: "1_DOCUMENTI/AMMINISTRATIVI/",
        },
        ExtensionRule {
            extensions: SHEETS,
            keyword_rules: &[KeywordRule {
                keywords: &["parcella", "onorari"],
                folder: "4_PARCELLA/",
            }],
            default_folder: "2_ELABORATI/CALCOLI/",
        },
        ExtensionRule {
            extensions: IMAGES,
            keyword_rules: &[],
            default_folder: "1_DOCUMENTI/FOTO/",
        },
        ExtensionRule {
            extensions: MAIL,
            keyword_rules: &[],
            default_folder: "1_DOCUMENTI/AMMINISTRATIVI/",
        },
    ],
    fallback_folder: "0_CONSEGNA/",
};

pub fn table_for(template: TemplateName) -> &'static RuleTable {
    match template {
        TemplateName::Lungo => &LUNGO_RULES,
        TemplateName::Breve => &BREVE_RULES,
    }
}

pub fn classify(signature: &FileSignature, template: TemplateName) -> RoutingSuggestion {
    let table = table_for(template);
    let name = signature.file_name.to_lowercase();

    let Some(ext_rule) = table
        .rules
        .iter()
        .find(|r| r.extensions.contains(&signature.extension.as_str()))
    else {
        return RoutingSuggestion {
            suggested_path: table.fallback_folder.to_string(),
            confidence: FALLBACK_CONFIDENCE,
            reasoning: format!(
                "Estensione '{}' non riconosciuta: cartella di raccolta del modello {}",
                signature.extension, template
            ),
            method: RoutingMethod::Rules,
            alternatives: Vec::new(),
        };
    };

    for rule in ext_rule.keyword_rules {
        if let Some(keyword) = rule.keywords.iter().find(|k| name.contains(*k)) {
            return RoutingSuggestion {
                suggested_path: rule.folder.to_string(),
                confidence: KEYWORD_CONFIDENCE,
                reasoning: format!(
                    "File .{} con parola chiave '{}' nel nome",
                    signature.extension, keyword
                ),
                method: RoutingMethod::Rules,
                alternatives: vec![ext_rule.default_folder.to_string()],
            };
        }
    }

    RoutingSuggestion {
        suggested_path: ext_rule.default_folder.to_string(),
        confidence: EXTENSION_DEFAULT_CONFIDENCE,
        reasoning: format!(
            "Nessuna parola chiave riconosciuta: cartella abituale per i file .{}",
            signature.extension
        ),
        method: RoutingMethod::Rules,
        alternatives: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::models::FileUpload;

    fn route(name: &str, template: TemplateName) -> RoutingSuggestion {
        classify(&analyzer::analyze(&FileUpload::named(name)), template)
    }

    #[test]
    fn test_every_rule_folder_exists_in_its_template() {
        for template in [TemplateName::Lungo, TemplateName::Breve] {
            let table = table_for(template);
            assert!(template.contains(table.fallback_folder));
            for ext_rule in table.rules {
                assert!(template.contains(ext_rule.default_folder), "{}", ext_rule.default_folder);
                for rule in ext_rule.keyword_rules {
                    assert!(template.contains(rule.folder), "{}", rule.folder);
                }
            }
        }
    }

    #[test]
    fn test_dwg_with_plan_keyword() {
        let s = route("pianta_piano_terra.dwg", TemplateName::Lungo);
        assert_eq!(s.suggested_path, "3_PROGETTO/ARC/");
        assert_eq!(s.confidence, KEYWORD_CONFIDENCE);
        assert_eq!(s.method, RoutingMethod::Rules);
        assert_eq!(s.alternatives, vec!["3_PROGETTO/".to_string()]);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        let s = route("FATTURA_2024_03.PDF", TemplateName::Lungo);
        assert_eq!(s.suggested_path, "9_PARCELLA/");
        assert_eq!(s.confidence, KEYWORD_CONFIDENCE);
    }

    #[test]
    fn test_first_matching_keyword_rule_wins() {
        // "relazione" e "calcolo" puntano alla stessa cartella, "contratto" viene prima
        let s = route("contratto_relazione.pdf", TemplateName::Lungo);
        assert_eq!(s.suggested_path, "1_AMMINISTRATIVA/CONTRATTO/");
    }

    #[test]
    fn test_extension_without_keyword_uses_default() {
        let s = route("IMG_0042.jpg", TemplateName::Lungo);
        assert_eq!(s.suggested_path, "2_RILIEVO/FOTO/");
        assert_eq!(s.confidence, EXTENSION_DEFAULT_CONFIDENCE);
        assert!(s.alternatives.is_empty());

        let s = route("IMG_0042.jpg", TemplateName::Breve);
        assert_eq!(s.suggested_path, "1_DOCUMENTI/FOTO/");
    }

    #[test]
    fn test_unknown_extension_uses_fallback() {
        for name in ["archivio.zip", "LEGGIMI"] {
            let s = route(name, TemplateName::Breve);
            assert_eq!(s.suggested_path, "0_CONSEGNA/");
            assert_eq!(s.confidence, FALLBACK_CONFIDENCE);
            assert_eq!(s.method, RoutingMethod::Rules);
        }
    }

    #[test]
    fn test_rule_confidences_are_strictly_ordered() {
        assert!(KEYWORD_CONFIDENCE > EXTENSION_DEFAULT_CONFIDENCE);
        assert!(EXTENSION_DEFAULT_CONFIDENCE > FALLBACK_CONFIDENCE);
        assert!(FALLBACK_CONFIDENCE > 0.0);
    }
}
