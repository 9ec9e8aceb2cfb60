//! Kommando-Verarbeitung
//!
//! Zeilenbasierte Kommandos von stdin werden in ein getaggtes Enum
//! geparst und per `match` verteilt – keine veraenderliche Map von
//! Handler-Funktionen.

/// Ein geparstes Kommando
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kommando {
    /// Voice-Session auf dem Server starten; ohne Adresse wird der
    /// konfigurierte Standard verwendet
    Beitreten { adresse: Option<String> },
    /// Aktive Session beenden
    Verlassen,
    /// Verfuegbare Audio-Geraete auflisten
    Geraete,
    /// Zustand der aktiven Session anzeigen
    Status,
    /// Kommando-Uebersicht anzeigen
    Hilfe,
    /// Bruecke beenden
    Beenden,
}

/// Kommando-Uebersicht fuer `help` und den Programmstart
pub const HILFE: &str = "\
Kommandos:
  join [adresse]   Voice-Session starten (Standard: konfigurierter Server)
  leave            Session beenden
  devices          Audio-Geraete auflisten
  status           Session-Zustand anzeigen
  help             Diese Uebersicht
  quit             Bruecke beenden";

/// Parst eine Kommandozeile.
///
/// Kommandonamen sind unabhaengig von Gross-/Kleinschreibung;
/// ueberzaehlige Argumente sind ein Fehler.
pub fn parse_zeile(zeile: &str) -> Result<Kommando, String> {
    let mut teile = zeile.split_whitespace();
    let name = match teile.next() {
        Some(name) => name.to_lowercase(),
        None => return Err("Leere Befehlszeile".into()),
    };

    let kommando = match name.as_str() {
        "join" => Kommando::Beitreten {
            adresse: teile.next().map(str::to_string),
        },
        "leave" => Kommando::Verlassen,
        "devices" => Kommando::Geraete,
        "status" => Kommando::Status,
        "help" => Kommando::Hilfe,
        "quit" | "exit" => Kommando::Beenden,
        andere => return Err(format!("Unbekanntes Kommando: {andere} ('help' zeigt die Uebersicht)")),
    };

    if teile.next().is_some() {
        return Err(format!("Zu viele Argumente fuer '{name}'"));
    }

    Ok(kommando)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_mit_adresse() {
        assert_eq!(
            parse_zeile("join 10.0.0.1:4000"),
            Ok(Kommando::Beitreten {
                adresse: Some("10.0.0.1:4000".into())
            })
        );
    }

    #[test]
    fn join_ohne_adresse() {
        assert_eq!(
            parse_zeile("join"),
            Ok(Kommando::Beitreten { adresse: None })
        );
    }

    #[test]
    fn einfache_kommandos() {
        assert_eq!(parse_zeile("leave"), Ok(Kommando::Verlassen));
        assert_eq!(parse_zeile("devices"), Ok(Kommando::Geraete));
        assert_eq!(parse_zeile("status"), Ok(Kommando::Status));
        assert_eq!(parse_zeile("help"), Ok(Kommando::Hilfe));
        assert_eq!(parse_zeile("quit"), Ok(Kommando::Beenden));
        assert_eq!(parse_zeile("exit"), Ok(Kommando::Beenden));
    }

    #[test]
    fn gross_kleinschreibung_egal() {
        assert_eq!(parse_zeile("LEAVE"), Ok(Kommando::Verlassen));
        assert_eq!(
            parse_zeile("Join server:1234"),
            Ok(Kommando::Beitreten {
                adresse: Some("server:1234".into())
            })
        );
    }

    #[test]
    fn fuehrende_leerzeichen_egal() {
        assert_eq!(parse_zeile("   status  "), Ok(Kommando::Status));
    }

    #[test]
    fn leere_zeile_ist_fehler() {
        assert!(parse_zeile("").is_err());
        assert!(parse_zeile("   ").is_err());
    }

    #[test]
    fn unbekanntes_kommando_ist_fehler() {
        let fehler = parse_zeile("tanzen").unwrap_err();
        assert!(fehler.contains("tanzen"));
    }

    #[test]
    fn ueberzaehlige_argumente_sind_fehler() {
        assert!(parse_zeile("leave jetzt").is_err());
        assert!(parse_zeile("join a b").is_err());
    }
}
