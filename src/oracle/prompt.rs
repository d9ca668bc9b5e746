// src/oracle/prompt.rs
//! Fixed instruction sent to the similarity oracle.
//!
//! The evidence categories and their weights are guidance for the oracle only;
//! nothing downstream inspects them. The sole contract the pipeline relies on
//! is the `similarity_score` reply field.

use super::parse::SCORE_FIELD;

const INSTRUCTION_HEADER: &str = "\
You assist a family reunification service for refugees and displaced people \
from conflict and crisis zones. Two people each wrote a description while \
searching for relatives. Judge how likely it is that the two descriptions \
refer to members of the same family, or to the same missing person.";

const EVIDENCE_GUIDE: &str = "\
Weigh the evidence as follows.

IDENTITY MARKERS (high weight)
- names, nicknames, transliterations and phonetic variants
- stated relationships: parent/child, siblings, spouses, extended family
- age, physical traits, scars, disabilities, clothing, personal belongings

LOCATION (high weight)
- home towns, villages, neighbourhoods and streets
- camps, shelters, hospitals, checkpoints, border crossings, landmarks

TIMING (medium weight)
- dates or periods of separation, seasons, holidays
- ages at the time of separation, consistency of timelines

CONTEXT (medium weight)
- the separation event: raid, evacuation, bombing, detention, medical emergency
- shared routes or destinations

RELATIONAL STRUCTURE (medium weight)
- complementary searches, e.g. one seeks a child and the other a parent
- matching family size, ages and genders
- the same person sought from different relationships

LINGUISTIC CUES (low weight)
- dialect, regional vocabulary, cultural and religious references

Allow for trauma-related memory gaps, translation errors, naming conventions, \
children's limited recollection and age progression over long separations.";

const SCORING_BANDS: &str = "\
Scoring bands:
- 0.90-1.00 almost certain: several strong indicators align
- 0.70-0.89 strong: key markers match with minor discrepancies
- 0.50-0.69 moderate: significant similarities, key confirmations missing
- 0.30-0.49 weak: few, mostly circumstantial similarities
- 0.00-0.29 unlikely: little or no meaningful connection";

/// Builds the full oracle prompt for one pair of descriptions.
pub fn build_similarity_prompt(description_a: &str, description_b: &str) -> String {
    format!(
        "{header}\n\nDESCRIPTION 1:\n{a}\n\nDESCRIPTION 2:\n{b}\n\n{guide}\n\n{bands}\n\n\
         Reply with exactly one JSON object and nothing else:\n\
         {{\"{field}\": <decimal between 0.0 and 1.0>}}\n",
        header = INSTRUCTION_HEADER,
        a = description_a.trim(),
        b = description_b.trim(),
        guide = EVIDENCE_GUIDE,
        bands = SCORING_BANDS,
        field = SCORE_FIELD,
    )
}
