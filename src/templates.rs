//! Registro de plantillas de carpetas (LUNGO / BREVE).
//!
//! Las dos jerarquías son estáticas. Se aplanan en profundidad (el padre
//! siempre antes que sus hijos) y cada ruta termina en `/`. Esa lista es la
//! única fuente válida de destinos: el prompt IA la enumera y el validador
//! comprueba contra ella.

use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemplateName {
    Lungo,
    Breve,
}

impl TemplateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateName::Lungo => "LUNGO",
            TemplateName::Breve => "BREVE",
        }
    }
}

impl std::fmt::Display for TemplateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateName {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LUNGO" => Ok(Self::Lungo),
            "BREVE" => Ok(Self::Breve),
            _ => Err(RouterError::UnknownTemplate(s.to_string())),
        }
    }
}

/// Nodo del árbol de carpetas: nombre y subcarpetas.
#[derive(Debug)]
pub struct FolderNode {
    pub name: &'static str,
    pub children: &'static [FolderNode],
}

macro_rules! leaf {
    ($name:literal) => {
        FolderNode { name: $name, children: &[] }
    };
}

macro_rules! dir {
    ($name:literal, [$($child:expr),* $(,)?]) => {
        FolderNode { name: $name, children: &[$($child),*] }
    };
}

static LUNGO_TREE: &[FolderNode] = &[
    leaf!("0_CONSEGNA"),
    dir!("1_AMMINISTRATIVA", [leaf!("CONTRATTO"), leaf!("CORRISPONDENZA"), leaf!("VERBALI")]),
    dir!("2_RILIEVO", [leaf!("FOTO"), leaf!("DOCUMENTI_CATASTALI"), leaf!("RILIEVO_METRICO")]),
    dir!(
        "3_PROGETTO",
        [
            leaf!("ARC"),
            leaf!("STR"),
            dir!("IMP", [leaf!("ELETTRICO"), leaf!("MECCANICO")]),
            leaf!("RELAZIONI"),
        ]
    ),
    dir!("4_PRATICHE", [leaf!("COMUNE"), leaf!("GENIO_CIVILE"), leaf!("VIGILI_FUOCO")]),
    dir!("5_COMPUTI", [leaf!("COMPUTO_METRICO"), leaf!("ELENCO_PREZZI")]),
    dir!("6_SICUREZZA", [leaf!("PSC"), leaf!("FASCICOLO")]),
    dir!(
        "7_DIREZIONE_LAVORI",
        [
            leaf!("GIORNALE_LAVORI"),
            leaf!("SAL"),
            leaf!("VERBALI_CANTIERE"),
            leaf!("FOTO_CANTIERE"),
        ]
    ),
    leaf!("8_COLLAUDO"),
    leaf!("9_PARCELLA"),
];

static BREVE_TREE: &[FolderNode] = &[
    leaf!("0_CONSEGNA"),
    dir!("1_DOCUMENTI", [leaf!("AMMINISTRATIVI"), leaf!("CATASTALI"), leaf!("FOTO")]),
    dir!("2_ELABORATI", [leaf!("GRAFICI"), leaf!("RELAZIONI"), leaf!("CALCOLI")]),
    leaf!("3_PRATICHE"),
    leaf!("4_PARCELLA"),
];

const LUNGO_STRUCTURE: &str = "\
Struttura LUNGO (commesse complesse):
- 0_CONSEGNA/: materiale ricevuto dal cliente non ancora smistato
- 1_AMMINISTRATIVA/: documenti amministrativi della commessa
  - CONTRATTO/: incarico, disciplinare, offerte firmate
  - CORRISPONDENZA/: email, lettere, comunicazioni con cliente ed enti
  - VERBALI/: verbali di riunione
- 2_RILIEVO/: stato di fatto
  - FOTO/: fotografie del sopralluogo
  - DOCUMENTI_CATASTALI/: visure, planimetrie catastali, estratti di mappa
  - RILIEVO_METRICO/: rilievi geometrici e restituzioni grafiche
- 3_PROGETTO/: elaborati di progetto
  - ARC/: architettonico (piante, prospetti, sezioni)
  - STR/: strutturale (carpenterie, armature, fondazioni)
  - IMP/: impianti
    - ELETTRICO/: impianto elettrico e speciali
    - MECCANICO/: termico, idraulico, climatizzazione
  - RELAZIONI/: relazioni tecniche e di calcolo
- 4_PRATICHE/: pratiche autorizzative
  - COMUNE/: permessi di costruire, SCIA, CILA
  - GENIO_CIVILE/: depositi e autorizzazioni sismiche
  - VIGILI_FUOCO/: pratiche antincendio
- 5_COMPUTI/: aspetti economici del progetto
  - COMPUTO_METRICO/: computi metrici estimativi
  - ELENCO_PREZZI/: elenchi prezzi e analisi
- 6_SICUREZZA/: sicurezza in cantiere
  - PSC/: piano di sicurezza e coordinamento
  - FASCICOLO/: fascicolo dell'opera
- 7_DIREZIONE_LAVORI/: fase esecutiva
  - GIORNALE_LAVORI/: giornale dei lavori
  - SAL/: stati di avanzamento lavori
  - VERBALI_CANTIERE/: verbali di sopralluogo e di cantiere
  - FOTO_CANTIERE/: fotografie di cantiere
- 8_COLLAUDO/: collaudi e certificati finali
- 9_PARCELLA/: parcelle, notule e fatture della prestazione
";

const BREVE_STRUCTURE: &str = "\
Struttura BREVE (incarichi semplici):
- 0_CONSEGNA/: materiale ricevuto dal cliente non ancora smistato
- 1_DOCUMENTI/: documentazione di partenza
  - AMMINISTRATIVI/: incarico, corrispondenza, documenti del cliente
  - CATASTALI/: visure e planimetrie catastali
  - FOTO/: fotografie del sopralluogo
- 2_ELABORATI/: prodotti dello studio
  - GRAFICI/: tavole e disegni
  - RELAZIONI/: relazioni tecniche e perizie
  - CALCOLI/: fogli di calcolo e computi
- 3_PRATICHE/: pratiche presso enti
- 4_PARCELLA/: parcelle e fatture
";

static LUNGO_FOLDERS: LazyLock<Vec<String>> = LazyLock::new(|| flatten(TemplateName::Lungo.tree()));
static BREVE_FOLDERS: LazyLock<Vec<String>> = LazyLock::new(|| flatten(TemplateName::Breve.tree()));

fn flatten(tree: &[FolderNode]) -> Vec<String> {
    fn walk(nodes: &[FolderNode], prefix: &str, out: &mut Vec<String>) {
        for node in nodes {
            let path = format!("{prefix}{}/", node.name);
            out.push(path.clone());
            walk(node.children, &path, out);
        }
    }

    let mut out = Vec::new();
    walk(tree, "", &mut out);
    out
}

impl TemplateName {
    pub fn tree(&self) -> &'static [FolderNode] {
        match self {
            TemplateName::Lungo => LUNGO_TREE,
            TemplateName::Breve => BREVE_TREE,
        }
    }

    /// Rutas de la plantilla, en profundidad y con `/` final.
    pub fn folders(&self) -> &'static [String] {
        match self {
            TemplateName::Lungo => LUNGO_FOLDERS.as_slice(),
            TemplateName::Breve => BREVE_FOLDERS.as_slice(),
        }
    }

    /// Descripción legible de la jerarquía, sólo para enriquecer el prompt.
    pub fn structure_text(&self) -> &'static str {
        match self {
            TemplateName::Lungo => LUNGO_STRUCTURE,
            TemplateName::Breve => BREVE_STRUCTURE,
        }
    }

    /// Carpeta de consegna: destino seguro cuando no hay nada mejor.
    pub fn safe_default(&self) -> &'static str {
        self.folders()[0].as_str()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.folders().iter().any(|f| f == path)
    }
}

/// Lista de carpetas de una plantilla por nombre. Falla para nombres desconocidos.
pub fn available_folders(template: &str) -> Result<Vec<String>, RouterError> {
    let name: TemplateName = template.parse()?;
    Ok(name.folders().to_vec())
}

pub fn template_structure_text(template: &str) -> Result<&'static str, RouterError> {
    let name: TemplateName = template.parse()?;
    Ok(name.structure_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_puts_parent_before_children() {
        let folders = TemplateName::Lungo.folders();
        for (idx, path) in folders.iter().enumerate() {
            let trimmed = path.trim_end_matches('/');
            if let Some((parent, _)) = trimmed.rsplit_once('/') {
                let parent = format!("{parent}/");
                let parent_idx = folders.iter().position(|f| *f == parent).unwrap();
                assert!(parent_idx < idx, "{parent} debe preceder a {path}");
            }
        }
    }

    #[test]
    fn test_lungo_has_expected_paths() {
        let folders = TemplateName::Lungo.folders();
        assert_eq!(folders[0], "0_CONSEGNA/");
        assert!(folders.contains(&"3_PROGETTO/ARC/".to_string()));
        assert!(folders.contains(&"3_PROGETTO/IMP/ELETTRICO/".to_string()));
        assert!(folders.contains(&"9_PARCELLA/".to_string()));
        assert!(!folders.contains(&"9_FATTURE/".to_string()));
    }

    #[test]
    fn test_every_path_has_trailing_slash_and_is_unique() {
        for template in [TemplateName::Lungo, TemplateName::Breve] {
            let folders = template.folders();
            let mut seen = std::collections::HashSet::new();
            for path in folders {
                assert!(path.ends_with('/'));
                assert!(seen.insert(path.clone()), "ruta duplicada: {path}");
            }
        }
    }

    #[test]
    fn test_unknown_template_is_a_configuration_error() {
        let err = available_folders("INVALID").unwrap_err();
        assert!(matches!(err, RouterError::UnknownTemplate(ref name) if name == "INVALID"));
        assert!(template_structure_text("INVALID").is_err());
    }

    #[test]
    fn test_template_names_parse_case_insensitively() {
        assert_eq!("lungo".parse::<TemplateName>().unwrap(), TemplateName::Lungo);
        assert_eq!(" BREVE ".parse::<TemplateName>().unwrap(), TemplateName::Breve);
        assert_eq!(available_folders("BREVE").unwrap()[0], "0_CONSEGNA/");
    }

    #[test]
    fn test_structure_text_mentions_every_top_level_folder() {
        for template in [TemplateName::Lungo, TemplateName::Breve] {
            let text = template.structure_text();
            for node in template.tree() {
                assert!(text.contains(node.name), "{} no aparece en {template}", node.name);
            }
        }
    }
}
