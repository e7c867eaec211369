//! Locales and the message catalogue for everything the engine surfaces.
//!
//! Strings are looked up by [`MessageKey`]; nothing outside this module
//! builds user-visible text for errors or presence labels.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "es")]
    Es,
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "pt-PT")]
    PtPt,
    #[serde(rename = "fr")]
    Fr,
    #[serde(rename = "de")]
    De,
    #[serde(rename = "it")]
    It,
}

impl Locale {
    pub const ALL: [Locale; 7] = [
        Locale::En,
        Locale::Es,
        Locale::PtBr,
        Locale::PtPt,
        Locale::Fr,
        Locale::De,
        Locale::It,
    ];

    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::PtBr => "pt-BR",
            Self::PtPt => "pt-PT",
            Self::Fr => "fr",
            Self::De => "de",
            Self::It => "it",
        }
    }

    /// Parses a BCP 47-ish tag. Region subtags are only significant for
    /// Portuguese; a bare `pt` maps to Brazilian Portuguese.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().replace('_', "-").to_ascii_lowercase();
        let (language, region) = match normalized.split_once('-') {
            Some((l, r)) => (l.to_string(), Some(r.to_string())),
            None => (normalized.clone(), None),
        };
        match language.as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            "pt" => match region.as_deref() {
                Some("pt") => Some(Self::PtPt),
                _ => Some(Self::PtBr),
            },
            "fr" => Some(Self::Fr),
            "de" => Some(Self::De),
            "it" => Some(Self::It),
            _ => None,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Maps an ISO 3166-1 alpha-2 country code to the locale the app should use
/// there. Unmapped countries return `None` and the caller keeps its locale.
#[must_use]
pub fn locale_for_country(country_code: &str) -> Option<Locale> {
    let code = country_code.trim().to_ascii_uppercase();
    let locale = match code.as_str() {
        "BR" => Locale::PtBr,
        "PT" | "AO" | "MZ" | "CV" | "GW" | "ST" | "TL" => Locale::PtPt,
        "ES" | "MX" | "AR" | "CO" | "CL" | "PE" | "VE" | "EC" | "GT" | "CU" | "BO" | "DO"
        | "HN" | "PY" | "SV" | "NI" | "CR" | "PA" | "UY" | "GQ" => Locale::Es,
        "FR" | "MC" | "SN" | "CI" | "ML" | "NE" | "BF" | "TG" | "BJ" | "GA" | "CG" | "CD"
        | "MG" | "CM" | "HT" => Locale::Fr,
        "DE" | "AT" | "LI" => Locale::De,
        "IT" | "SM" | "VA" => Locale::It,
        "US" | "GB" | "IE" | "AU" | "NZ" | "CA" | "ZA" | "NG" | "KE" | "GH" | "JM" | "SG"
        | "PH" | "IN" | "MT" => Locale::En,
        _ => return None,
    };
    Some(locale)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
    Generic,
    NetworkUnavailable,
    Timeout,
    NotFound,
    PermissionDenied,
    Unsupported,
    StorageFailed,
    DataError,
    InvalidRating,
    EmptyComment,
    PresenceOnline,
    PresenceOffline,
}

/// Looks up the catalogue entry for `key` in `locale`.
#[must_use]
pub fn translate(key: MessageKey, locale: Locale) -> &'static str {
    use Locale::{De, En, Es, Fr, It, PtBr, PtPt};
    use MessageKey::{
        DataError, EmptyComment, Generic, InvalidRating, NetworkUnavailable, NotFound,
        PermissionDenied, PresenceOffline, PresenceOnline, StorageFailed, Timeout, Unsupported,
    };

    match (key, locale) {
        (Generic, En) => "Something went wrong. Please try again.",
        (Generic, Es) => "Algo salió mal. Inténtalo de nuevo.",
        (Generic, PtBr) => "Algo deu errado. Tente novamente.",
        (Generic, PtPt) => "Ocorreu um erro. Tente novamente.",
        (Generic, Fr) => "Une erreur est survenue. Veuillez réessayer.",
        (Generic, De) => "Etwas ist schiefgelaufen. Bitte versuche es erneut.",
        (Generic, It) => "Qualcosa è andato storto. Riprova.",

        (NetworkUnavailable, En) => "Unable to connect. Check your connection and try again.",
        (NetworkUnavailable, Es) => "No se pudo conectar. Revisa tu conexión e inténtalo de nuevo.",
        (NetworkUnavailable, PtBr) => "Não foi possível conectar. Verifique sua conexão.",
        (NetworkUnavailable, PtPt) => "Não foi possível ligar. Verifique a sua ligação.",
        (NetworkUnavailable, Fr) => "Connexion impossible. Vérifiez votre réseau.",
        (NetworkUnavailable, De) => "Keine Verbindung. Bitte prüfe deine Internetverbindung.",
        (NetworkUnavailable, It) => "Impossibile connettersi. Controlla la connessione.",

        (Timeout, En) => "The request timed out. Please try again.",
        (Timeout, Es) => "La solicitud tardó demasiado. Inténtalo de nuevo.",
        (Timeout, PtBr) => "A solicitação expirou. Tente novamente.",
        (Timeout, PtPt) => "O pedido expirou. Tente novamente.",
        (Timeout, Fr) => "La requête a expiré. Veuillez réessayer.",
        (Timeout, De) => "Die Anfrage hat zu lange gedauert. Bitte erneut versuchen.",
        (Timeout, It) => "La richiesta è scaduta. Riprova.",

        (NotFound, En) => "The requested item could not be found.",
        (NotFound, Es) => "No se encontró el elemento solicitado.",
        (NotFound, PtBr) => "O item solicitado não foi encontrado.",
        (NotFound, PtPt) => "O item pedido não foi encontrado.",
        (NotFound, Fr) => "L'élément demandé est introuvable.",
        (NotFound, De) => "Der angeforderte Eintrag wurde nicht gefunden.",
        (NotFound, It) => "L'elemento richiesto non è stato trovato.",

        (PermissionDenied, En) => "You don't have permission to do that.",
        (PermissionDenied, Es) => "No tienes permiso para hacer esto.",
        (PermissionDenied, PtBr) => "Você não tem permissão para fazer isso.",
        (PermissionDenied, PtPt) => "Não tem permissão para fazer isto.",
        (PermissionDenied, Fr) => "Vous n'avez pas l'autorisation de faire cela.",
        (PermissionDenied, De) => "Dazu fehlt dir die Berechtigung.",
        (PermissionDenied, It) => "Non hai il permesso di farlo.",

        (Unsupported, En) => "This feature isn't available on your device.",
        (Unsupported, Es) => "Esta función no está disponible en tu dispositivo.",
        (Unsupported, PtBr) => "Este recurso não está disponível no seu dispositivo.",
        (Unsupported, PtPt) => "Esta funcionalidade não está disponível no seu dispositivo.",
        (Unsupported, Fr) => "Cette fonctionnalité n'est pas disponible sur votre appareil.",
        (Unsupported, De) => "Diese Funktion ist auf deinem Gerät nicht verfügbar.",
        (Unsupported, It) => "Questa funzione non è disponibile sul tuo dispositivo.",

        (StorageFailed, En) => "Unable to save your settings on this device.",
        (StorageFailed, Es) => "No se pudo guardar la configuración en este dispositivo.",
        (StorageFailed, PtBr) => "Não foi possível salvar as configurações neste dispositivo.",
        (StorageFailed, PtPt) => "Não foi possível guardar as definições neste dispositivo.",
        (StorageFailed, Fr) => "Impossible d'enregistrer vos réglages sur cet appareil.",
        (StorageFailed, De) => "Einstellungen konnten nicht gespeichert werden.",
        (StorageFailed, It) => "Impossibile salvare le impostazioni su questo dispositivo.",

        (DataError, En) => "We received unexpected data. Please try again later.",
        (DataError, Es) => "Recibimos datos inesperados. Inténtalo más tarde.",
        (DataError, PtBr) => "Recebemos dados inesperados. Tente mais tarde.",
        (DataError, PtPt) => "Recebemos dados inesperados. Tente mais tarde.",
        (DataError, Fr) => "Données inattendues reçues. Réessayez plus tard.",
        (DataError, De) => "Unerwartete Daten empfangen. Bitte später erneut versuchen.",
        (DataError, It) => "Abbiamo ricevuto dati inattesi. Riprova più tardi.",

        (InvalidRating, En) => "Please choose a rating from 1 to 5 stars.",
        (InvalidRating, Es) => "Elige una valoración de 1 a 5 estrellas.",
        (InvalidRating, PtBr) => "Escolha uma avaliação de 1 a 5 estrelas.",
        (InvalidRating, PtPt) => "Escolha uma avaliação de 1 a 5 estrelas.",
        (InvalidRating, Fr) => "Choisissez une note de 1 à 5 étoiles.",
        (InvalidRating, De) => "Bitte wähle eine Bewertung von 1 bis 5 Sternen.",
        (InvalidRating, It) => "Scegli una valutazione da 1 a 5 stelle.",

        (EmptyComment, En) => "Please enter your name and a message.",
        (EmptyComment, Es) => "Escribe tu nombre y un mensaje.",
        (EmptyComment, PtBr) => "Informe seu nome e uma mensagem.",
        (EmptyComment, PtPt) => "Indique o seu nome e uma mensagem.",
        (EmptyComment, Fr) => "Veuillez saisir votre nom et un message.",
        (EmptyComment, De) => "Bitte gib deinen Namen und eine Nachricht ein.",
        (EmptyComment, It) => "Inserisci il tuo nome e un messaggio.",

        (PresenceOnline, En) => "Online",
        (PresenceOnline, Es) => "En línea",
        (PresenceOnline, PtBr | PtPt) => "Online",
        (PresenceOnline, Fr) => "En ligne",
        (PresenceOnline, De) => "Online",
        (PresenceOnline, It) => "Online",

        (PresenceOffline, En) => "Offline",
        (PresenceOffline, Es) => "Desconectado",
        (PresenceOffline, PtBr | PtPt) => "Offline",
        (PresenceOffline, Fr) => "Hors ligne",
        (PresenceOffline, De) => "Offline",
        (PresenceOffline, It) => "Offline",
    }
}
