use std::collections::HashSet;
use std::sync::OnceLock;

/// Languages with a built-in stopword list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    English,
    German,
    French,
    Spanish,
    Italian,
    Portuguese,
    Dutch,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::English,
        Language::German,
        Language::French,
        Language::Spanish,
        Language::Italian,
        Language::Portuguese,
        Language::Dutch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::German => "German",
            Language::French => "French",
            Language::Spanish => "Spanish",
            Language::Italian => "Italian",
            Language::Portuguese => "Portuguese",
            Language::Dutch => "Dutch",
        }
    }

    pub fn stopwords(&self) -> &'static HashSet<&'static str> {
        static LISTS: OnceLock<Vec<HashSet<&'static str>>> = OnceLock::new();
        let lists = LISTS.get_or_init(|| {
            Language::ALL
                .iter()
                .map(|lang| raw_stopwords(*lang).split_whitespace().collect())
                .collect()
        });
        &lists[*self as usize]
    }
}

/// Guess the language of a page by counting how many distinct tokens of the
/// text appear in each language's stopword list. Ties go to the earlier
/// language in [`Language::ALL`], so text without any stopwords is English.
pub fn guess_language(text: &str) -> Language {
    let tokens: HashSet<String> = tokenize(text).collect();

    let mut best = Language::English;
    let mut best_hits = 0usize;
    for lang in Language::ALL {
        let stopwords = lang.stopwords();
        let hits = tokens
            .iter()
            .filter(|t| stopwords.contains(t.as_str()))
            .count();
        if hits > best_hits {
            best = lang;
            best_hits = hits;
        }
    }
    best
}

/// Lowercased alphabetic tokens.
pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphabetic() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn raw_stopwords(lang: Language) -> &'static str {
    match lang {
        Language::English => {
            "a about above after again against all also am an and any are aren't as at be \
             because been before being below between both but by can can't cannot could did \
             do does doing down during each even ever few for from further had has have having \
             he her here hers herself him himself his how however i if in into is isn't it it's \
             its itself just last like made make many may me might more most much must my myself \
             never new no nor not now of off on once one only or other our ours ourselves out \
             over own said same says she should since so some still such than that the their \
             theirs them themselves then there these they this those though through to too two \
             under until up upon us very was wasn't we were what when where whether which while \
             who whom whose why will with within without would yet you your yours yourself"
        }
        Language::German => {
            "aber alle allem allen aller alles als also am an ander andere anderem anderen auch \
             auf aus bei bin bis bist da damit dann das dass dein deine dem den denn der des dich \
             die dies diese diesem diesen dieser dieses dir doch dort du durch ein eine einem \
             einen einer eines er es etwas euch euer für gegen gewesen hab habe haben hat hatte \
             hier hin hinter ich ihm ihn ihnen ihr ihre im in indem ins ist jede jedem jeden jeder \
             jetzt kann kein keine können man manche mein meine mich mir mit muss nach nicht \
             nichts noch nun nur ob oder ohne sehr sein seine sich sie sind so solche soll sondern \
             um und uns unser unter viel vom von vor war waren warst was weil weiter welche wenn \
             werde werden wie wieder will wir wird wo wollen zu zum zur zwar zwischen über"
        }
        Language::French => {
            "a ai aie alors au aucun aussi autre aux avec avoir bon c ce cela ces cet cette ceux \
             chaque ci comme comment d dans de des donc dont du elle elles en encore est et été \
             être eu fait faire il ils j je l la le les leur leurs lui m ma mais me même mes moi \
             mon n ne ni nos notre nous on ont ou où par parce pas peu peut plus pour pourquoi \
             qu quand que quel quelle qui s sa sans se ses si son sont sous sur ta te tes toi ton \
             tous tout toute toutes très tu un une vos votre vous y à ça"
        }
        Language::Spanish => {
            "a al algo algunos ante antes como con contra cual cuando de del desde donde durante \
             e el ella ellas ellos en entre era es esa ese eso esta estaba estado estas este esto \
             estos fue fueron ha había han hasta hay la las le les lo los más me mi mientras muy \
             nada ni no nos nosotros o otra otros para pero poco por porque que quien se sea ser \
             si sido sin sobre son su sus también tanto te tiene todo todos tu un una uno unos y \
             ya yo él"
        }
        Language::Italian => {
            "a ad agli al alla alle allo anche ancora avere c che chi ci come con contro cui da \
             dal dalla dalle degli dei del della delle dello di dove e ed era erano essere fa gli \
             ha hanno i il in io la le lei li lo loro ma mi mio molto ne negli nei nel nella nelle \
             non noi nostro o per perché più poi quale quando quella quelle quello questa queste \
             questo se si sia siamo sono sta stato su sua sue sul sulla suo tra tu tutti tutto un \
             una uno vi è"
        }
        Language::Portuguese => {
            "a ao aos aquela aquele as até com como da das de dela dele depois do dos e ela elas \
             ele eles em entre era essa esse esta este eu foi for foram há isso isto já lhe mais \
             mas me mesmo meu minha muito na nas nem no nos nossa nosso não num numa o os ou para \
             pela pelas pelo pelos por qual quando que quem se sem ser seu sua são só também te \
             tem tinha um uma você à às é"
        }
        Language::Dutch => {
            "aan al alles als altijd andere ben bij daar dan dat de der deze die dit doch doen \
             door dus een eens en er ge geen geweest haar had heb hebben heeft hem het hier hij \
             hoe hun iemand iets ik in is ja je kan kon kunnen maar me meer men met mij mijn moet \
             na naar niet niets nog nu of om omdat onder ons ook op over reeds te tegen toch toen \
             tot u uit uw van veel voor want waren was wat werd wezen wie wil worden wordt zal ze \
             zelf zich zij zijn zo zonder zou"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_english() {
        let text = "The rover has been driving across the surface of the planet for more than a decade.";
        assert_eq!(guess_language(text), Language::English);
    }

    #[test]
    fn test_guess_german() {
        let text = "Der Rover ist seit mehr als zehn Jahren auf dem Mars und sendet noch immer Daten, die wir auswerten.";
        assert_eq!(guess_language(text), Language::German);
    }

    #[test]
    fn test_guess_french() {
        let text = "Le robot est toujours sur la planète et il envoie des données que nous utilisons pour la mission.";
        assert_eq!(guess_language(text), Language::French);
    }

    #[test]
    fn test_no_stopwords_defaults_to_english() {
        assert_eq!(guess_language("xyzzy plugh 12345"), Language::English);
        assert_eq!(guess_language(""), Language::English);
    }

    #[test]
    fn test_stopword_lists_are_lowercase() {
        for lang in Language::ALL {
            assert!(!lang.stopwords().is_empty(), "{} list empty", lang.name());
            for word in lang.stopwords() {
                assert_eq!(*word, word.to_lowercase(), "{} has {word}", lang.name());
            }
        }
    }
}
