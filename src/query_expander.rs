use serde::Serialize;

/// Upper bound on the number of query variants produced per query.
pub const MAX_VARIANTS: usize = 8;

/// Synonyms substituted per matched term.
const SYNONYMS_PER_TERM: usize = 2;

/// Keywords appended as standalone queries.
const MAX_KEYWORDS: usize = 2;

const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    // Colors
    ("blue", &["azure", "navy", "cobalt"]),
    ("red", &["crimson", "scarlet"]),
    ("green", &["emerald", "verdant"]),
    ("yellow", &["golden", "amber"]),
    // Buildings
    ("building", &["house", "tower", "architecture"]),
    ("house", &["home", "residence", "cottage"]),
    ("skyscraper", &["tower", "highrise"]),
    // People
    ("person", &["people", "portrait", "face"]),
    ("people", &["person", "crowd", "group"]),
    // Landscape
    ("sky", &["clouds", "heavens"]),
    ("sea", &["ocean", "waves"]),
    ("ocean", &["sea", "waves"]),
    ("mountain", &["peak", "summit", "hill"]),
    ("tree", &["forest", "woods"]),
    // Animals
    ("cat", &["kitten", "kitty"]),
    ("dog", &["puppy", "hound"]),
    // Food
    ("food", &["meal", "dish", "cuisine"]),
    ("meal", &["food", "dinner"]),
    // Vehicles
    ("car", &["automobile", "vehicle"]),
    ("bike", &["bicycle", "cycle"]),
    // Events
    ("wedding", &["ceremony", "marriage"]),
    ("birthday", &["party", "celebration"]),
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "at", "with", "and", "or", "is",
    "are", "to", "for", "from", "by", "my", "some",
];

/// Ordered, deduplicated query variants. The first entry is always the
/// query exactly as the user typed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySet(Vec<String>);

impl QuerySet {
    /// A set containing only `query`.
    pub fn verbatim(query: &str) -> Self {
        Self(vec![query.to_string()])
    }

    pub fn original(&self) -> &str {
        &self.0[0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a set holds at least the original query.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Append `variant` unless already present or the set is full.
    fn push(&mut self, variant: String) {
        if self.0.len() < MAX_VARIANTS && !self.0.contains(&variant) {
            self.0.push(variant);
        }
    }
}

/// Synonym and keyword based query expansion.
///
/// # Examples
///
/// ```
/// use photosearch::QueryExpander;
///
/// let expander = QueryExpander::default();
/// let set = expander.expand("a red car");
/// assert_eq!(set.original(), "a red car");
/// assert!(set.iter().any(|q| q == "a crimson car"));
/// assert!(set.iter().any(|q| q == "car"));
/// ```
#[derive(Debug, Clone)]
pub struct QueryExpander {
    /// Term (as normalized tokens) -> synonyms.
    synonyms: Vec<(Vec<String>, Vec<String>)>,
    stopwords: Vec<String>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self {
            synonyms: DEFAULT_SYNONYMS
                .iter()
                .map(|(term, syns)| {
                    (
                        term_tokens(term),
                        syns.iter().map(|s| s.to_string()).collect(),
                    )
                })
                .collect(),
            stopwords: STOPWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl QueryExpander {
    /// Register extra synonyms for `term`, appended after existing ones.
    ///
    /// Multi-word terms such as "ice cream" match consecutive query words.
    /// A term without any alphanumeric word is ignored.
    pub fn add_synonyms<I, S>(&mut self, term: &str, synonyms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let term = term_tokens(term);
        if term.is_empty() {
            return;
        }
        let synonyms = synonyms.into_iter().map(Into::into);
        match self.synonyms.iter_mut().find(|(t, _)| *t == term) {
            Some((_, existing)) => existing.extend(synonyms),
            None => self.synonyms.push((term, synonyms.collect())),
        }
    }

    /// Expand `query` into at most [`MAX_VARIANTS`] variants.
    pub fn expand(&self, query: &str) -> QuerySet {
        let mut set = QuerySet::verbatim(query);
        let words: Vec<&str> = query.split_whitespace().collect();
        let cores: Vec<String> = words.iter().map(|w| core_token(w)).collect();

        for (term, synonyms) in &self.synonyms {
            if !cores.windows(term.len()).any(|w| w == term.as_slice()) {
                continue;
            }
            for synonym in synonyms.iter().take(SYNONYMS_PER_TERM) {
                set.push(substitute(&words, &cores, term, synonym));
            }
        }

        let normalized_query = query.trim().to_lowercase();
        let mut keywords = 0;
        for core in &cores {
            if keywords == MAX_KEYWORDS {
                break;
            }
            if core.chars().count() <= 1
                || self.stopwords.contains(core)
                || *core == normalized_query
                || set.0.contains(core)
            {
                continue;
            }
            set.push(core.clone());
            keywords += 1;
        }

        tracing::debug!(query, variants = set.len(), "expanded query");
        set
    }
}

/// Lowercased token with surrounding punctuation removed.
fn core_token(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

/// Normalized tokens of a synonym-table term.
fn term_tokens(term: &str) -> Vec<String> {
    term.split_whitespace()
        .map(core_token)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Rebuild the query with every occurrence of `term` replaced by
/// `synonym`, keeping the punctuation around the replaced words.
fn substitute(
    words: &[&str],
    cores: &[String],
    term: &[String],
    synonym: &str,
) -> String {
    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let end = i + term.len();
        if end <= cores.len() && cores[i..end] == *term {
            let first = words[i];
            let last = words[end - 1];
            let start = first.find(|c: char| c.is_alphanumeric()).unwrap_or(0);
            let stop = last
                .rfind(|c: char| c.is_alphanumeric())
                .map_or(last.len(), |j| {
                    j + last[j..].chars().next().map_or(1, char::len_utf8)
                });
            out.push(format!("{}{}{}", &first[..start], synonym, &last[stop..]));
            i = end;
        } else {
            out.push(words[i].to_string());
            i += 1;
        }
    }
    out.join(" ")
}
